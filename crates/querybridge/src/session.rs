//! # Bridge session
//!
//! One session per page. It owns the dispatcher, so there is exactly one
//! registry and one id space per page, and it is passed around explicitly
//! instead of living in a global.

use std::sync::Arc;

use querypack::Value;

use crate::config::BridgeConfig;
use crate::dispatch;
use crate::dispatch::PendingReply;
use crate::dispatch::QueryDispatcher;
use crate::engine::ScriptEngine;
use crate::handles::CallId;
use crate::handles::FrameId;
use crate::inject;
use crate::inject::FsLoader;
use crate::inject::InjectReport;
use crate::inject::Injector;
use crate::inject::ResourceLoader;
use crate::transport::Transport;

/// Fluent builder for a [`Session`].
pub struct SessionBuilder {
    engine: Arc<dyn ScriptEngine>,
    transport: Arc<dyn Transport>,
    config: BridgeConfig,
    loader: Arc<dyn ResourceLoader>,
    main_frame: FrameId,
}

impl SessionBuilder {
    pub fn new(engine: Arc<dyn ScriptEngine>, transport: Arc<dyn Transport>) -> Self {
        Self {
            engine,
            transport,
            config: BridgeConfig::default(),
            loader: Arc::new(FsLoader),
            main_frame: FrameId(0),
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn main_frame(mut self, frame: FrameId) -> Self {
        self.main_frame = frame;
        self
    }

    pub fn build(self) -> Session {
        let dispatcher = Arc::new(QueryDispatcher::new(
            self.config.response_name.clone(),
            self.engine.clone(),
            self.transport,
        ));

        Session {
            injector: Injector::new(self.config.clone(), self.loader),
            config: self.config,
            engine: self.engine,
            dispatcher,
            main_frame: self.main_frame,
        }
    }
}

/// The bridge state of one page.
pub struct Session {
    config: BridgeConfig,
    engine: Arc<dyn ScriptEngine>,
    dispatcher: Arc<QueryDispatcher>,
    injector: Injector,
    main_frame: FrameId,
}

impl Session {
    pub fn builder(engine: Arc<dyn ScriptEngine>, transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder::new(engine, transport)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<QueryDispatcher> {
        &self.dispatcher
    }

    pub fn main_frame(&self) -> FrameId {
        self.main_frame
    }

    /// Called when a navigation commits in `frame`.
    ///
    /// Injects the bridge entry points into the main frame. Any other frame
    /// is rejected without touching the engine.
    pub fn did_commit_load(&self, frame: FrameId) -> inject::Result<InjectReport> {
        if frame != self.main_frame {
            tracing::info!(
                event = "bridge.inject.rejected",
                frame = ?frame,
                "Frame is not allowed to inject window objects"
            );
            return Err(inject::Error::NotMainFrame(frame));
        }

        Ok(self.injector.inject_all(self.engine.as_ref(), &self.dispatcher))
    }

    /// Forwards an inbound message to the dispatcher.
    pub fn on_message(&self, name: &str, body: &Value) -> dispatch::Result<CallId> {
        self.dispatcher.on_message(name, body)
    }

    /// Issues a query from Rust; see [`QueryDispatcher::query`].
    pub fn query(&self, name: &str, message: &str) -> dispatch::Result<PendingReply> {
        self.dispatcher.query(name, message)
    }
}
