//! # Transport Abstraction
//!
//! How envelopes reach the external process, and how its replies come back.
//!
//! ## Philosophy
//!
//! - **Fire and forget outbound**: `send` hands an envelope off and returns.
//!   It never waits for the reply; replies are correlated by call id later.
//! - **Byte-oriented inbound**: an [`Inbound`] source yields encoded
//!   messages. Decoding and routing them is the pump's job, not the source's.

use std::fmt;

use crate::envelope::OutboundEnvelope;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the channel was dropped.
    ConnectionLost(String),
    /// The envelope could not be encoded for the wire.
    Encode(querypack::Error),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Encode(e) => write!(f, "Encode error: {}", e),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<querypack::Error> for Error {
    fn from(e: querypack::Error) -> Self {
        Self::Encode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Delivers outbound envelopes to the external process.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync + 'static {
    /// Hands `envelope` off for delivery.
    ///
    /// # invariants
    /// - Must not block waiting for the reply.
    /// - `Err` means the envelope was definitely not sent.
    fn send(&self, envelope: &OutboundEnvelope) -> Result<()>;
}

/// A stream of encoded inbound messages.
#[async_trait::async_trait]
pub trait Inbound: Send + Sync + 'static {
    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` once the stream is closed for good.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
