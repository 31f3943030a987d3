//! # Entry point injection
//!
//! Installs the two functions script code uses to reach the bridge:
//!
//! - the global query function (`wpeQuery(message, onSuccess, onError)`), and
//! - the namespaced one (`ServiceManager.sendQuery({request, onSuccess, onFailure})`),
//!   which only exists after the namespace script has been evaluated.
//!
//! Each entry point is installed independently. Whatever fails is logged
//! where it fails and that entry point is skipped; there is no retry and no
//! fallback.

use std::fmt;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;

use crate::config::BridgeConfig;
use crate::dispatch;
use crate::dispatch::QueryDispatcher;
use crate::engine;
use crate::engine::CallStyle;
use crate::engine::QueryArgs;
use crate::engine::QueryFn;
use crate::engine::ScriptEngine;
use crate::handles::FrameId;

#[derive(Debug)]
pub enum Error {
    /// Injection was requested for a frame other than the main frame.
    NotMainFrame(FrameId),
    /// The namespace script could not be read.
    Resource { path: PathBuf, source: io::Error },
    /// Evaluating the namespace script raised.
    Evaluation(engine::Error),
    /// The namespace script ran but did not define the namespace object.
    MissingNamespace(String),
    /// The engine refused to define the entry point property.
    Define(engine::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMainFrame(frame) => write!(f, "Frame {:?} is not allowed to inject window objects", frame),
            Self::Resource { path, source } => write!(f, "Could not read file {}: {}", path.display(), source),
            Self::Evaluation(e) => write!(f, "Could not evaluate user script: {}", e),
            Self::MissingNamespace(name) => write!(f, "Could not find {} object", name),
            Self::Define(e) => write!(f, "Could not set property: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resource { source, .. } => Some(source),
            Self::Evaluation(e) | Self::Define(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reads script resources by path.
pub trait ResourceLoader: Send + Sync + 'static {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads resources from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsLoader;

impl ResourceLoader for FsLoader {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// What an injection pass installed.
#[derive(Debug)]
pub struct InjectReport {
    /// The global query function.
    pub query: Result<()>,
    /// The namespaced query method.
    pub namespace: Result<()>,
}

impl InjectReport {
    pub fn all_installed(&self) -> bool {
        self.query.is_ok() && self.namespace.is_ok()
    }
}

/// Installs bridge entry points into a script context.
pub struct Injector {
    config: BridgeConfig,
    loader: Arc<dyn ResourceLoader>,
}

impl Injector {
    pub fn new(config: BridgeConfig, loader: Arc<dyn ResourceLoader>) -> Self {
        Self { config, loader }
    }

    /// Installs both entry points, each independently of the other.
    pub fn inject_all(&self, engine: &dyn ScriptEngine, dispatcher: &Arc<QueryDispatcher>) -> InjectReport {
        let report = InjectReport {
            query: self.inject_query(engine, dispatcher),
            namespace: self.inject_namespace(engine, dispatcher),
        };

        for (entry, result) in [("query", &report.query), ("namespace", &report.namespace)] {
            if let Err(e) = result {
                tracing::error!(event = "bridge.inject.failed", entry, error = %e, "Injection skipped");
            }
        }
        report
    }

    /// Defines the global query function.
    pub fn inject_query(&self, engine: &dyn ScriptEngine, dispatcher: &Arc<QueryDispatcher>) -> Result<()> {
        let global = engine.global_object();
        let func = bind(dispatcher, &self.config.query_name);

        engine
            .define_query_property(global, &self.config.global_function, CallStyle::Positional, func)
            .map_err(Error::Define)?;

        tracing::debug!(
            event = "bridge.inject.query",
            property = %self.config.global_function,
            "Installed query function"
        );
        Ok(())
    }

    /// Evaluates the namespace script, then defines the namespaced query method.
    pub fn inject_namespace(&self, engine: &dyn ScriptEngine, dispatcher: &Arc<QueryDispatcher>) -> Result<()> {
        let path = &self.config.namespace_script;
        let source = self.loader.read(path).map_err(|source| Error::Resource {
            path: path.clone(),
            source,
        })?;

        engine.evaluate(&source).map_err(Error::Evaluation)?;

        let global = engine.global_object();
        let namespace = engine
            .get_property(global, &self.config.namespace)
            .ok_or_else(|| Error::MissingNamespace(self.config.namespace.clone()))?;

        let func = bind(dispatcher, &self.config.namespace_query_name);
        engine
            .define_query_property(namespace, &self.config.namespace_method, CallStyle::Options, func)
            .map_err(Error::Define)?;

        tracing::debug!(
            event = "bridge.inject.namespace",
            property = %format!("{}.{}", self.config.namespace, self.config.namespace_method),
            "Installed namespaced query method"
        );
        Ok(())
    }
}

/// Binds a query name to the dispatcher's outbound path.
///
/// The engine owns the returned function and the dispatcher owns the engine,
/// so the function only holds a weak reference back.
fn bind(dispatcher: &Arc<QueryDispatcher>, name: &str) -> QueryFn {
    let dispatcher: Weak<QueryDispatcher> = Arc::downgrade(dispatcher);
    let name = name.to_string();

    Arc::new(move |args: QueryArgs| {
        let dispatcher = dispatcher.upgrade().ok_or(dispatch::Error::SessionClosed)?;
        dispatcher.send_query(&name, &args.message, args.on_success, args.on_error)
    })
}
