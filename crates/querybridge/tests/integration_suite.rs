//! End-to-end tests: script calls through injected functions, a channel
//! transport, and the inbound pump.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use querybridge::CallId;
use querybridge::FrameId;
use querybridge::Session;
use querybridge::Value;
use querybridge::channel::ChannelTransport;
use querybridge::engine::QueryArgs;
use querybridge::mock::MemoryLoader;
use querybridge::mock::MockEngine;
use querybridge::pump::spawn_pump;
use querypack::Message;

const RESPONSE: &str = "onJavaScriptBridgeResponse";
const SCRIPT_PATH: &str = "/usr/share/injectedbundle/ServiceManager.js";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A session wired to one end of a channel, with the pump running on it.
struct Harness {
    engine: Arc<MockEngine>,
    session: Session,
    remote: ChannelTransport,
    pump: tokio::task::JoinHandle<querybridge::transport::Result<()>>,
}

fn harness() -> Harness {
    init_tracing();
    let engine = Arc::new(MockEngine::new());
    let (local, remote) = ChannelTransport::pair();
    let local = Arc::new(local);

    let loader = MemoryLoader::new().with(SCRIPT_PATH, "window.ServiceManager = {};");
    let session = Session::builder(engine.clone(), local.clone())
        .loader(Arc::new(loader))
        .build();
    assert!(session.did_commit_load(FrameId(0)).expect("main frame").all_installed());

    let pump = spawn_pump(local, session.dispatcher().clone());
    Harness { engine, session, remote, pump }
}

impl Harness {
    fn query(&self, message: &str) -> (CallId, querybridge::Handle, querybridge::Handle) {
        let on_success = self.engine.function("onSuccess");
        let on_error = self.engine.function("onError");
        let args = QueryArgs { message: message.to_string(), on_success, on_error };
        let id = self
            .engine
            .call_global("wpeQuery", args)
            .expect("wpeQuery installed")
            .expect("query accepted");
        (id, on_success, on_error)
    }

    fn respond(&self, id: u64, succeeded: bool, message: &str) {
        let body = Value::list([Value::U64(id), Value::Bool(succeeded), Value::from(message)]);
        self.remote.post(&Message::new(RESPONSE, body)).expect("post response");
    }

    async fn settle(&self, invocations: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.engine.invocations().len() < invocations {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("responses were not routed in time");
    }
}

#[tokio::test]
async fn test_query_reaches_remote_and_resolves() {
    let h = harness();
    let (id, s, e) = h.query("hello");
    assert_ne!(id, CallId::NONE);

    let request = h.remote.recv_message().await.unwrap().expect("request");
    assert_eq!(request.name, "onJavaScriptBridgeRequest");
    assert_eq!(request.body, Value::list([Value::U64(id.get()), Value::from("hello")]));

    h.respond(id.get(), true, "pong");
    h.settle(1).await;

    assert_eq!(h.engine.invocations_of(s), vec![vec!["pong".to_string()]]);
    assert!(h.engine.invocations_of(e).is_empty());
    assert_eq!(h.session.dispatcher().pending(), 0);
    assert_eq!(h.engine.total_retained(), 0);
}

#[tokio::test]
async fn test_shuffled_responses_reach_their_own_callbacks() {
    let h = harness();
    let calls: Vec<_> = (0..64).map(|i| h.query(&format!("q{}", i))).collect();

    let mut requests = Vec::new();
    for _ in 0..calls.len() {
        let msg = h.remote.recv_message().await.unwrap().expect("request");
        let id = msg.body.as_list().unwrap()[0].as_u64().unwrap();
        requests.push(id);
    }
    requests.shuffle(&mut rand::thread_rng());

    for id in &requests {
        h.respond(*id, id % 2 == 0, &format!("reply-{}", id));
    }
    h.settle(calls.len()).await;

    for (id, s, e) in &calls {
        let expected = vec![vec![format!("reply-{}", id)]];
        if id.get() % 2 == 0 {
            assert_eq!(h.engine.invocations_of(*s), expected);
            assert!(h.engine.invocations_of(*e).is_empty());
        } else {
            assert_eq!(h.engine.invocations_of(*e), expected);
            assert!(h.engine.invocations_of(*s).is_empty());
        }
    }
    assert_eq!(h.engine.total_retained(), 0);
    assert_eq!(h.engine.over_releases(), 0);
}

#[tokio::test]
async fn test_pump_skips_bad_messages() {
    let h = harness();
    let (id, s, _) = h.query("hello");

    h.remote.post_raw(vec![0xFF, 0x00, 0x13]).unwrap();
    h.remote.post(&Message::new("bogus", Value::list([]))).unwrap();
    h.remote.post(&Message::new(RESPONSE, Value::list([Value::U64(id.get())]))).unwrap();
    h.remote
        .post(&Message::new(RESPONSE, Value::list([Value::from("1"), Value::Bool(true), Value::from("x")])))
        .unwrap();
    h.respond(CallId::NONE.get(), true, "stray");
    h.respond(id.get(), true, "pong");
    h.respond(id.get(), true, "duplicate");

    h.settle(1).await;
    // Give the duplicate a chance to (not) be routed.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.engine.invocations(), vec![(s, vec!["pong".to_string()])]);
    assert!(!h.pump.is_finished());
}

#[tokio::test]
async fn test_pump_ends_when_remote_closes() {
    let h = harness();
    let Harness { remote, pump, .. } = h;
    drop(remote);

    let result = tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .expect("pump did not stop")
        .expect("pump panicked");
    assert!(result.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_native_queries() -> anyhow::Result<()> {
    let h = harness();
    let remote = Arc::new(h.remote);
    let dispatcher = h.session.dispatcher().clone();

    // Echo server on the remote end.
    let echo = {
        let remote = remote.clone();
        tokio::spawn(async move {
            while let Ok(Some(msg)) = remote.recv_message().await {
                let items = msg.body.as_list().unwrap_or_default().to_vec();
                let [id, text] = items.as_slice() else { continue };
                let body = Value::list([id.clone(), Value::Bool(true), text.clone()]);
                if remote.post(&Message::new(RESPONSE, body)).is_err() {
                    break;
                }
            }
        })
    };

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..25 {
                let text = format!("w{}-{}", worker, n);
                let reply = dispatcher.query("echo", &text)?;
                assert_eq!(reply.await?, Ok(text));
            }
            Ok::<_, querybridge::dispatch::Error>(())
        }));
    }

    for task in tasks {
        task.await??;
    }
    assert_eq!(dispatcher.pending(), 0);
    echo.abort();
    Ok(())
}
