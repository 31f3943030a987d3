//! In-memory stand-ins for the engine, the transport, and resource storage.
//!
//! These back the test suite. They record everything the bridge
//! does to them so tests can assert on retains, releases and invocations.

use std::collections::HashMap;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::dispatch;
use crate::engine;
use crate::engine::CallStyle;
use crate::engine::QueryArgs;
use crate::engine::QueryFn;
use crate::engine::ScriptEngine;
use crate::envelope::OutboundEnvelope;
use crate::handles::CallId;
use crate::handles::Handle;
use crate::inject::ResourceLoader;
use crate::transport;
use crate::transport::Transport;

/// The global object of every [`MockEngine`].
pub const GLOBAL: Handle = Handle(1);

#[derive(Clone)]
enum Property {
    Object(Handle),
    Query { style: CallStyle, func: QueryFn },
}

#[derive(Default)]
struct State {
    next_handle: u64,
    functions: HashMap<Handle, String>,
    properties: HashMap<(Handle, String), Property>,
    retains: HashMap<Handle, i64>,
    over_releases: usize,
    invocations: Vec<(Handle, Vec<String>)>,
    throwing: HashMap<Handle, String>,
    evaluated: Vec<String>,
    evaluation_error: Option<String>,
    define_failures: HashSet<String>,
}

/// A fake script engine.
///
/// Handles are plain counters. Evaluation understands exactly one statement
/// form, `window.Name = {};`, which defines an empty global object; every
/// other line is recorded and ignored.
pub struct MockEngine {
    state: Mutex<State>,
}

impl MockEngine {
    pub fn new() -> Self {
        let state = State { next_handle: GLOBAL.0 + 1, ..State::default() };
        Self { state: Mutex::new(state) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn alloc(state: &mut State) -> Handle {
        let handle = Handle(state.next_handle);
        state.next_handle += 1;
        handle
    }

    /// Creates a callable value labelled `label`.
    pub fn function(&self, label: &str) -> Handle {
        let mut state = self.lock();
        let handle = Self::alloc(&mut state);
        state.functions.insert(handle, label.to_string());
        handle
    }

    /// Makes `callable` throw `message` whenever it is invoked.
    pub fn throw_from(&self, callable: Handle, message: &str) {
        self.lock().throwing.insert(callable, message.to_string());
    }

    /// Makes every subsequent `evaluate` raise `message`.
    pub fn fail_evaluation(&self, message: &str) {
        self.lock().evaluation_error = Some(message.to_string());
    }

    /// Makes defining a property called `name` fail.
    pub fn fail_define(&self, name: &str) {
        self.lock().define_failures.insert(name.to_string());
    }

    /// Simulates a navigation: every property defined so far disappears.
    pub fn navigate(&self) {
        self.lock().properties.clear();
    }

    /// Current retain count of `handle`.
    pub fn retain_count(&self, handle: Handle) -> i64 {
        self.lock().retains.get(&handle).copied().unwrap_or(0)
    }

    /// Sum of all retain counts; zero when nothing is leaked.
    pub fn total_retained(&self) -> i64 {
        self.lock().retains.values().sum()
    }

    /// Number of `release` calls made on a handle with no outstanding retain.
    pub fn over_releases(&self) -> usize {
        self.lock().over_releases
    }

    pub fn invocations(&self) -> Vec<(Handle, Vec<String>)> {
        self.lock().invocations.clone()
    }

    /// Arguments of every invocation of `callable`, in order.
    pub fn invocations_of(&self, callable: Handle) -> Vec<Vec<String>> {
        self.lock()
            .invocations
            .iter()
            .filter(|(h, _)| *h == callable)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.lock().evaluated.clone()
    }

    /// The native function installed at `object[name]`, if any.
    pub fn query_property(&self, object: Handle, name: &str) -> Option<(CallStyle, QueryFn)> {
        match self.lock().properties.get(&(object, name.to_string()))? {
            Property::Query { style, func } => Some((*style, func.clone())),
            Property::Object(_) => None,
        }
    }

    /// Calls `object[name](args)` the way script code would.
    ///
    /// Returns `None` if there is no such function.
    pub fn call(&self, object: Handle, name: &str, args: QueryArgs) -> Option<dispatch::Result<CallId>> {
        // The state lock must not be held while the bridge runs.
        let (_, func) = self.query_property(object, name)?;
        Some(func(args))
    }

    /// Calls `window[name](args)`.
    pub fn call_global(&self, name: &str, args: QueryArgs) -> Option<dispatch::Result<CallId>> {
        self.call(GLOBAL, name, args)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for MockEngine {
    fn retain(&self, handle: Handle) {
        *self.lock().retains.entry(handle).or_insert(0) += 1;
    }

    fn release(&self, handle: Handle) {
        let mut guard = self.lock();
        let state = &mut *guard;
        match state.retains.get_mut(&handle) {
            Some(count) if *count > 0 => *count -= 1,
            _ => state.over_releases += 1,
        }
    }

    fn invoke(&self, callable: Handle, args: &[String]) -> engine::Result<()> {
        let mut state = self.lock();
        if !state.functions.contains_key(&callable) {
            return Err(engine::Error::NotCallable(callable));
        }
        state.invocations.push((callable, args.to_vec()));
        match state.throwing.get(&callable) {
            Some(message) => Err(engine::Error::Invocation(message.clone())),
            None => Ok(()),
        }
    }

    fn global_object(&self) -> Handle {
        GLOBAL
    }

    fn get_property(&self, object: Handle, name: &str) -> Option<Handle> {
        match self.lock().properties.get(&(object, name.to_string()))? {
            Property::Object(handle) => Some(*handle),
            Property::Query { .. } => None,
        }
    }

    fn define_query_property(
        &self,
        object: Handle,
        name: &str,
        style: CallStyle,
        func: QueryFn,
    ) -> engine::Result<()> {
        let mut state = self.lock();
        if state.define_failures.contains(name) {
            return Err(engine::Error::PropertyDefinition {
                name: name.to_string(),
                details: "rejected by engine".into(),
            });
        }

        let key = (object, name.to_string());
        if state.properties.contains_key(&key) {
            return Err(engine::Error::PropertyDefinition {
                name: name.to_string(),
                details: "property is read-only".into(),
            });
        }
        state.properties.insert(key, Property::Query { style, func });
        Ok(())
    }

    fn evaluate(&self, source: &str) -> engine::Result<()> {
        let mut state = self.lock();
        state.evaluated.push(source.to_string());
        if let Some(message) = &state.evaluation_error {
            return Err(engine::Error::Evaluation(message.clone()));
        }

        for line in source.lines() {
            let declared = line
                .trim()
                .strip_prefix("window.")
                .and_then(|rest| rest.strip_suffix(" = {};"))
                .filter(|name| !name.contains('.'));

            if let Some(name) = declared {
                let object = Self::alloc(&mut state);
                state.properties.insert((GLOBAL, name.to_string()), Property::Object(object));
            }
        }
        Ok(())
    }
}

/// A transport that records what it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEnvelope>>,
    failure: Mutex<Option<transport::Error>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope accepted so far, in order.
    pub fn sent(&self) -> Vec<OutboundEnvelope> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Makes subsequent sends fail with `error` until [`recover`](Self::recover).
    pub fn fail_with(&self, error: transport::Error) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Transport for RecordingTransport {
    fn send(&self, envelope: &OutboundEnvelope) -> transport::Result<()> {
        if let Some(e) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(e);
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(envelope.clone());
        Ok(())
    }
}

/// Serves resources from memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display())))
    }
}
