//! # Query dispatcher
//!
//! The entry point both directions go through.
//!
//! Outbound, [`QueryDispatcher::send_query`] retains the caller's callbacks,
//! registers them under a fresh [`CallId`], and forwards the envelope to the
//! transport. Inbound, [`QueryDispatcher::on_message`] decodes the response,
//! takes the pending call out of the registry, and invokes the matching
//! callback. Taking the call is what makes resolution at-most-once: a second
//! response for the same id finds nothing.
//!
//! Every rejection is logged here and returned to the caller. None of them
//! touch the registry.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use querypack::Value;
use tokio::sync::oneshot;

use crate::engine::Retained;
use crate::engine::ScriptEngine;
use crate::envelope::DecodeError;
use crate::envelope::OutboundEnvelope;
use crate::envelope::ResponseEnvelope;
use crate::handles::CallId;
use crate::handles::Handle;
use crate::registry::CallRegistry;
use crate::registry::Outcome;
use crate::registry::PendingCall;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Error {
    /// Inbound message with a name other than the response name.
    UnknownMessage(String),
    /// Response body of the wrong shape or types.
    Malformed(DecodeError),
    /// Response for an id that is not pending: never issued, or already resolved.
    UnknownCall(CallId),
    /// The transport refused the outbound envelope.
    Transport(transport::Error),
    /// The dispatcher behind an injected function is gone.
    SessionClosed,
    /// A native query was dropped without a response.
    Abandoned(CallId),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMessage(name) => write!(f, "Unknown message name '{}'", name),
            Self::Malformed(e) => write!(f, "Malformed response: {}", e),
            Self::UnknownCall(id) => write!(f, "No pending call with id {}", id),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::SessionClosed => write!(f, "Bridge session is closed"),
            Self::Abandoned(id) => write!(f, "Call {} was abandoned", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Malformed(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Routes queries out and responses back for one session.
pub struct QueryDispatcher {
    response_name: String,
    registry: CallRegistry,
    engine: Arc<dyn ScriptEngine>,
    transport: Arc<dyn Transport>,
}

impl QueryDispatcher {
    /// Creates a dispatcher whose ids come from the process-wide counter.
    pub fn new(
        response_name: impl Into<String>,
        engine: Arc<dyn ScriptEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_registry(response_name, CallRegistry::new(), engine, transport)
    }

    pub fn with_registry(
        response_name: impl Into<String>,
        registry: CallRegistry,
        engine: Arc<dyn ScriptEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            response_name: response_name.into(),
            registry,
            engine,
            transport,
        }
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    /// Number of queries still waiting for a response.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Issues a script query.
    ///
    /// Both callbacks are retained before this returns and stay retained
    /// until the response is processed. On success exactly one registry
    /// entry exists for the returned id. If the transport refuses the
    /// envelope, the entry is removed again and both callbacks released.
    pub fn send_query(
        &self,
        name: &str,
        message: &str,
        on_success: Handle,
        on_error: Handle,
    ) -> Result<CallId> {
        let success = Retained::new(self.engine.clone(), on_success);
        let error = Retained::new(self.engine.clone(), on_error);

        let id = self.registry.allocate();
        self.registry.register(id, PendingCall::script(success, error));

        self.forward(OutboundEnvelope::new(name, id, message))?;
        Ok(id)
    }

    /// Issues a query from Rust, resolved as a future instead of callbacks.
    pub fn query(&self, name: &str, message: &str) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();

        let id = self.registry.allocate();
        self.registry.register(id, PendingCall::Native(tx));

        self.forward(OutboundEnvelope::new(name, id, message))?;
        Ok(PendingReply { id, rx })
    }

    fn forward(&self, envelope: OutboundEnvelope) -> Result<()> {
        tracing::debug!(
            event = "bridge.send",
            name = %envelope.name,
            call_id = %envelope.call_id,
            payload = %envelope.message,
            "Forwarding query"
        );

        if let Err(e) = self.transport.send(&envelope) {
            // Dropping the entry releases its callbacks.
            drop(self.registry.take(envelope.call_id));
            tracing::warn!(
                event = "bridge.send.failed",
                call_id = %envelope.call_id,
                error = %e,
                "Transport refused query"
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Handles an inbound message from the transport.
    ///
    /// Only the configured response name is accepted. Returns the id of the
    /// call that was resolved.
    pub fn on_message(&self, name: &str, body: &Value) -> Result<CallId> {
        if name != self.response_name {
            tracing::warn!(
                event = "bridge.inbound.unknown_message",
                name = %name,
                "Unknown message name"
            );
            return Err(Error::UnknownMessage(name.to_string()));
        }
        self.on_response(body)
    }

    /// Decodes and resolves a response body `[call_id, succeeded, message]`.
    pub fn on_response(&self, body: &Value) -> Result<CallId> {
        let response = ResponseEnvelope::decode(body).inspect_err(|e| {
            tracing::warn!(
                event = "bridge.inbound.malformed",
                error = %e,
                "Rejecting response"
            );
        })?;

        let id = response.call_id;
        tracing::debug!(
            event = "bridge.inbound.response",
            call_id = %id,
            succeeded = response.succeeded,
            payload = %response.message,
            "Received response"
        );

        let Some(call) = self.registry.take(id) else {
            // Never issued, or a duplicate of one already resolved.
            tracing::error!(
                event = "bridge.inbound.unknown_call",
                call_id = %id,
                "Response for unknown call id"
            );
            return Err(Error::UnknownCall(id));
        };

        if let Err(e) = call.resolve(response) {
            tracing::debug!(
                event = "bridge.callback.raised",
                call_id = %id,
                error = %e,
                "Callback raised"
            );
        }

        tracing::debug!(
            event = "bridge.resolved",
            call_id = %id,
            remaining = self.registry.len(),
            "Call resolved"
        );
        Ok(id)
    }
}

/// The eventual response of a native [`QueryDispatcher::query`].
///
/// Resolves to `Ok(outcome)` when the response arrives, or
/// `Err(Error::Abandoned)` if the dispatcher is dropped first.
#[derive(Debug)]
pub struct PendingReply {
    id: CallId,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingReply {
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Outcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|res| res.map_err(|_| Error::Abandoned(id)))
    }
}
