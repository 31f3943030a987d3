//! # Inbound pump
//!
//! A background task that reads encoded messages from an [`Inbound`] source
//! and hands them to the dispatcher, so responses are routed as they arrive
//! in whatever order the external process produces them.
//!
//! Bad messages are logged and skipped. Only the source failing or closing
//! ends the pump.

use std::sync::Arc;

use querypack::Message;
use tokio::task::JoinHandle;

use crate::dispatch::QueryDispatcher;
use crate::transport;
use crate::transport::Inbound;

/// Spawns the pump on the current tokio runtime.
///
/// The task finishes with `Ok(())` when the source closes, or with the
/// source's error.
pub fn spawn_pump(
    source: Arc<dyn Inbound>,
    dispatcher: Arc<QueryDispatcher>,
) -> JoinHandle<transport::Result<()>> {
    tokio::spawn(async move {
        loop {
            match source.recv().await {
                Ok(Some(bytes)) => handle_bytes(&bytes, &dispatcher),
                Ok(None) => {
                    tracing::debug!(event = "bridge.pump.closed", "Inbound stream closed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(event = "bridge.pump.failed", error = %e, "Transport error in pump");
                    return Err(e);
                }
            }
        }
    })
}

fn handle_bytes(bytes: &[u8], dispatcher: &QueryDispatcher) {
    let message = match Message::from_bytes(bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(event = "bridge.pump.undecodable", error = %e, len = bytes.len(), "Dropping message");
            return;
        }
    };

    // Rejections are already logged by the dispatcher.
    let _ = dispatcher.on_message(&message.name, &message.body);
}
