//! In-process transport over tokio channels.
//!
//! [`ChannelTransport::pair`] returns two connected ends. The bridge end is
//! used as both the [`Transport`] and the [`Inbound`] source of a session; the
//! other end stands in for the external process, reading the encoded queries
//! and posting responses back.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use querypack::Message;

use crate::envelope::OutboundEnvelope;
use crate::transport;
use crate::transport::Inbound;
use crate::transport::Transport;

/// One end of a duplex channel carrying encoded [`Message`]s.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ChannelTransport {
    /// Creates a pair of transports connected to each other.
    ///
    /// Messages posted on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self { tx: tx_a, rx: Mutex::new(rx_b) };
        let b = Self { tx: tx_b, rx: Mutex::new(rx_a) };

        (a, b)
    }

    /// Encodes and posts a message to the other end. Never blocks.
    pub fn post(&self, message: &Message) -> transport::Result<()> {
        self.post_raw(message.to_bytes()?)
    }

    /// Posts raw bytes without encoding them.
    pub fn post_raw(&self, bytes: Vec<u8>) -> transport::Result<()> {
        self.tx
            .send(bytes)
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    /// Waits for the next message and decodes it.
    pub async fn recv_message(&self) -> transport::Result<Option<Message>> {
        match self.recv().await? {
            Some(bytes) => Ok(Some(Message::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, envelope: &OutboundEnvelope) -> transport::Result<()> {
        self.post(&envelope.to_message())
    }
}

#[async_trait::async_trait]
impl Inbound for ChannelTransport {
    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
