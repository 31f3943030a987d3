//! # querybridge
//!
//! Correlates asynchronous queries issued from an embedded script context
//! with the responses an external process sends back.
//!
//! Script code calls an injected function with a message and two callbacks.
//! The bridge retains the callbacks, tags the query with a fresh [`CallId`],
//! and forwards it. When a response `[call_id, succeeded, message]` arrives,
//! the bridge finds the call, invokes the success or error callback with the
//! message, and releases both callbacks.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod handles;
pub mod inject;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pump;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::BridgeConfig;
pub use dispatch::PendingReply;
pub use dispatch::QueryDispatcher;
pub use engine::ScriptEngine;
pub use handles::CallId;
pub use handles::FrameId;
pub use handles::Handle;
pub use querypack::Value;
pub use registry::CallRegistry;
pub use session::Session;
