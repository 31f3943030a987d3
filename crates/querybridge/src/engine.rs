//! # Script engine boundary
//!
//! The bridge never touches a script engine directly. Everything it needs
//! from one is behind [`ScriptEngine`]: keeping callbacks alive, calling them,
//! evaluating a script, and installing native functions on objects.
//!
//! Engines are typically single-threaded. An implementation that receives a
//! call from another thread is responsible for marshaling it onto the engine
//! thread.

use std::fmt;
use std::sync::Arc;

use crate::dispatch;
use crate::handles::CallId;
use crate::handles::Handle;

/// Errors reported by a script engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Evaluating a script raised an exception.
    Evaluation(String),
    /// Invoking a callable raised an exception.
    Invocation(String),
    /// The handle does not refer to a callable value.
    NotCallable(Handle),
    /// Defining a property on an object failed.
    PropertyDefinition { name: String, details: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluation(msg) => write!(f, "Script evaluation failed: {}", msg),
            Self::Invocation(msg) => write!(f, "Callback raised: {}", msg),
            Self::NotCallable(h) => write!(f, "Handle {:?} is not callable", h),
            Self::PropertyDefinition { name, details } => {
                write!(f, "Could not define property '{}': {}", name, details)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// How the script side passes arguments to an injected query function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStyle {
    /// `f(message, onSuccess, onError)`
    Positional,
    /// `f({ request, onSuccess, onFailure })`
    Options,
}

/// Arguments of an injected query function after the engine unpacked them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryArgs {
    pub message: String,
    pub on_success: Handle,
    pub on_error: Handle,
}

/// A native function installed into the script global scope.
pub type QueryFn = Arc<dyn Fn(QueryArgs) -> dispatch::Result<CallId> + Send + Sync>;

/// The capabilities the bridge consumes from an embedded script engine.
///
/// This trait is object-safe (`Arc<dyn ScriptEngine>`).
pub trait ScriptEngine: Send + Sync + 'static {
    /// Protects `handle` from garbage collection. Calls nest.
    fn retain(&self, handle: Handle);

    /// Undoes one `retain`.
    fn release(&self, handle: Handle);

    /// Calls `callable` with string arguments.
    ///
    /// An exception thrown by the callee is reported as `Err` and is
    /// otherwise the engine's business.
    fn invoke(&self, callable: Handle, args: &[String]) -> Result<()>;

    /// The global (`window`) object of the current context.
    fn global_object(&self) -> Handle;

    /// Reads `object[name]` if it holds an object.
    fn get_property(&self, object: Handle, name: &str) -> Option<Handle>;

    /// Defines `object[name]` as a read-only, non-enumerable, non-deletable
    /// native function.
    fn define_query_property(
        &self,
        object: Handle,
        name: &str,
        style: CallStyle,
        func: QueryFn,
    ) -> Result<()>;

    /// Evaluates a script in the global scope, discarding its value.
    fn evaluate(&self, source: &str) -> Result<()>;
}

/// A handle kept alive for as long as this guard exists.
///
/// Construction retains, drop releases. There is no other way to release, so
/// a `Retained` is released exactly once on every path.
pub struct Retained {
    engine: Arc<dyn ScriptEngine>,
    handle: Handle,
}

impl Retained {
    pub fn new(engine: Arc<dyn ScriptEngine>, handle: Handle) -> Self {
        engine.retain(handle);
        Self { engine, handle }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Calls the retained value with a single string argument.
    pub fn invoke(&self, arg: &str) -> Result<()> {
        self.engine.invoke(self.handle, &[arg.to_string()])
    }
}

impl Drop for Retained {
    fn drop(&mut self) {
        self.engine.release(self.handle);
    }
}

impl fmt::Debug for Retained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Retained").field(&self.handle).finish()
    }
}
