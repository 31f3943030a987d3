//! # Call registry
//!
//! Owns identifier allocation and the table of pending calls.
//!
//! The registry is touched from the thread issuing queries and from whatever
//! thread delivers responses, so the table is a concurrent map and the
//! counter is atomic. The counter is process-wide and shared by every
//! registry, so no two sessions ever hand out the same id. Each entry owns its retained callbacks: removing an
//! entry and releasing its handles are one step, because the handles are
//! released when the removed entry is dropped.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::engine;
use crate::engine::Retained;
use crate::envelope::ResponseEnvelope;
use crate::handles::CallId;

/// The process-wide call id counter. Id 0 is never issued.
static NEXT_CALL_ID: LazyLock<Arc<AtomicU64>> = LazyLock::new(|| Arc::new(AtomicU64::new(1)));

/// Success payload or error payload of a resolved call.
pub type Outcome = std::result::Result<String, String>;

/// The retained success/error callbacks of a script-issued query.
#[derive(Debug)]
pub struct ScriptCallbacks {
    pub success: Retained,
    pub error: Retained,
}

/// One outstanding query.
#[derive(Debug)]
pub enum PendingCall {
    /// Issued from script; resolves by invoking one of two callbacks.
    Script(ScriptCallbacks),
    /// Issued from Rust; resolves a oneshot channel.
    Native(oneshot::Sender<Outcome>),
}

impl PendingCall {
    pub fn script(success: Retained, error: Retained) -> Self {
        Self::Script(ScriptCallbacks { success, error })
    }

    /// Delivers the response and consumes the call.
    ///
    /// For script calls the selected callback receives the payload as its
    /// only argument, and both callbacks are released on return whichever one
    /// ran. A callback that throws is reported as `Err`; the call is resolved
    /// either way.
    pub fn resolve(self, response: ResponseEnvelope) -> engine::Result<()> {
        match self {
            Self::Script(callbacks) => {
                let selected = if response.succeeded { &callbacks.success } else { &callbacks.error };
                selected.invoke(&response.message)
            }
            Self::Native(tx) => {
                // The receiver may have been dropped; nothing to do then.
                let _ = tx.send(response.outcome());
                Ok(())
            }
        }
    }
}

/// Maps call identifiers to pending calls.
///
/// No iteration and no eviction: an entry leaves only through [`take`](Self::take),
/// or when the registry itself is dropped.
pub struct CallRegistry {
    pending: DashMap<CallId, PendingCall>,
    next_id: Arc<AtomicU64>,
}

impl CallRegistry {
    /// Creates an empty registry drawing ids from the process-wide counter.
    pub fn new() -> Self {
        Self::with_counter(NEXT_CALL_ID.clone())
    }

    /// Creates an empty registry drawing ids from `counter`.
    ///
    /// Registries sharing a counter never hand out the same id. A counter
    /// should start at 1.
    pub fn with_counter(counter: Arc<AtomicU64>) -> Self {
        Self {
            pending: DashMap::new(),
            next_id: counter,
        }
    }

    /// Returns a fresh identifier. Never blocks, never repeats.
    pub fn allocate(&self) -> CallId {
        CallId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts `call` under `id`.
    ///
    /// `id` must come from [`allocate`](Self::allocate) and not be registered
    /// yet. A duplicate is a logic error: it is logged, the existing entry is
    /// kept, and `call` is dropped (releasing its handles).
    pub fn register(&self, id: CallId, call: PendingCall) {
        match self.pending.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(call);
            }
            Entry::Occupied(_) => {
                tracing::error!(
                    event = "bridge.registry.duplicate",
                    call_id = %id,
                    "Refusing to overwrite pending call"
                );
            }
        }
    }

    /// Removes and returns the pending call for `id`, if any.
    pub fn take(&self, id: CallId) -> Option<PendingCall> {
        self.pending.remove(&id).map(|(_, call)| call)
    }

    /// Number of unresolved calls.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.pending.contains_key(&id)
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::engine::ScriptEngine;
    use crate::mock::MockEngine;

    fn script_call(engine: &Arc<MockEngine>) -> (PendingCall, crate::handles::Handle, crate::handles::Handle) {
        let dyn_engine: Arc<dyn ScriptEngine> = engine.clone();
        let s = engine.function("onSuccess");
        let e = engine.function("onError");
        let call = PendingCall::script(
            Retained::new(dyn_engine.clone(), s),
            Retained::new(dyn_engine, e),
        );
        (call, s, e)
    }

    #[test]
    fn test_allocate_starts_at_one() {
        let registry = CallRegistry::with_counter(Arc::new(AtomicU64::new(1)));
        assert_eq!(registry.allocate(), CallId(1));
        assert_eq!(registry.allocate(), CallId(2));
        assert_ne!(CallRegistry::new().allocate(), CallId::NONE);
    }

    #[test]
    fn test_registries_share_the_process_counter() {
        let a = CallRegistry::new();
        let b = CallRegistry::new();
        let ids: Vec<CallId> = (0..100).flat_map(|_| [a.allocate(), b.allocate()]).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_shared_counter_across_registries() {
        let counter = Arc::new(AtomicU64::new(1));
        let a = CallRegistry::with_counter(counter.clone());
        let b = CallRegistry::with_counter(counter);
        assert_eq!(a.allocate(), CallId(1));
        assert_eq!(b.allocate(), CallId(2));
        assert_eq!(a.allocate(), CallId(3));
    }

    #[test]
    fn test_allocate_strictly_increasing() {
        let registry = CallRegistry::new();
        let ids: Vec<CallId> = (0..1000).map(|_| registry.allocate()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_allocate_unique_across_threads() {
        let registry = Arc::new(CallRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || (0..500).map(|_| registry.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for worker in workers {
            for id in worker.join().unwrap() {
                assert!(all.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(all.len(), 8 * 500);
    }

    #[test]
    fn test_take_removes_exactly_once() {
        let engine = Arc::new(MockEngine::new());
        let registry = CallRegistry::new();
        let (call, s, e) = script_call(&engine);
        let id = registry.allocate();
        registry.register(id, call);

        assert_eq!(registry.len(), 1);
        assert_eq!(engine.retain_count(s), 1);

        let taken = registry.take(id);
        assert!(taken.is_some());
        assert!(registry.is_empty());
        assert!(registry.take(id).is_none());

        // Handles stay retained until the taken call is dropped.
        assert_eq!(engine.retain_count(e), 1);
        drop(taken);
        assert_eq!(engine.retain_count(s), 0);
        assert_eq!(engine.retain_count(e), 0);
    }

    #[test]
    fn test_take_unknown_id() {
        let registry = CallRegistry::new();
        assert!(registry.take(CallId(99)).is_none());
        assert!(registry.take(CallId::NONE).is_none());
    }

    #[test]
    fn test_resolve_releases_both_handles() {
        let engine = Arc::new(MockEngine::new());
        let (call, s, e) = script_call(&engine);

        call.resolve(ResponseEnvelope::failure(CallId(1), "boom")).unwrap();

        assert_eq!(engine.invocations(), vec![(e, vec!["boom".to_string()])]);
        assert_eq!(engine.retain_count(s), 0);
        assert_eq!(engine.retain_count(e), 0);
    }

    #[test]
    fn test_resolve_throwing_callback_still_releases() {
        let engine = Arc::new(MockEngine::new());
        let (call, s, e) = script_call(&engine);
        engine.throw_from(s, "TypeError: nope");

        let result = call.resolve(ResponseEnvelope::success(CallId(1), "pong"));

        assert!(matches!(result, Err(engine::Error::Invocation(_))));
        assert_eq!(engine.retain_count(s), 0);
        assert_eq!(engine.retain_count(e), 0);
    }

    #[test]
    fn test_dropping_registry_releases_abandoned_calls() {
        let engine = Arc::new(MockEngine::new());
        let registry = CallRegistry::new();
        let (call, s, e) = script_call(&engine);
        registry.register(registry.allocate(), call);

        drop(registry);

        assert_eq!(engine.retain_count(s), 0);
        assert_eq!(engine.retain_count(e), 0);
        assert!(engine.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_native_call_resolves_channel() {
        let registry = CallRegistry::new();
        let (tx, rx) = oneshot::channel();
        let id = registry.allocate();
        registry.register(id, PendingCall::Native(tx));

        let call = registry.take(id).unwrap();
        call.resolve(ResponseEnvelope::success(id, "ok")).unwrap();

        assert_eq!(rx.await.unwrap(), Ok("ok".to_string()));
    }
}
