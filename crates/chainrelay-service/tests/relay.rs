//! Subscription lifecycle and delivery, end to end with scripted adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use chainrelay_core::adapter::emit;
use chainrelay_core::error::{AdapterError, ConfigError, SubscriptionError, TransportError};
use chainrelay_core::jobid::job_id_topic;
use chainrelay_core::metrics::SourcePing;
use chainrelay_core::store::StoreSnapshot;
use chainrelay_core::{
    CanonicalRequest, ChainType, ConfigStore, Endpoint, EventSink, InMemoryConfigStore, LogEvent,
    ProtocolAdapter, RawChainEvent, Shutdown, StructuredRequest, Subscription,
};
use chainrelay_service::{
    AdapterFactory, DispatchConfig, Dispatcher, SubscriptionManager, TriggerClient, TriggerError,
};

// ─── Scripted adapters ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Script {
    events: Vec<RawChainEvent>,
    refuse_connection: bool,
}

#[derive(Default)]
struct Tally {
    emitted: AtomicUsize,
    stopped: AtomicBool,
}

struct ScriptedAdapter {
    script: Script,
    tally: Arc<Tally>,
    ping: SourcePing,
}

#[async_trait]
impl ProtocolAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_source_ping(&mut self, ping: SourcePing) {
        self.ping = ping;
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        if self.script.refuse_connection {
            return Err(TransportError::Http("connection refused".into()).into());
        }
        Ok(())
    }

    async fn run(&mut self, sink: EventSink, mut shutdown: Shutdown) -> Result<(), AdapterError> {
        for event in self.script.events.drain(..) {
            self.ping.touch();
            if !emit(&sink, event, &mut shutdown).await {
                break;
            }
            self.tally.emitted.fetch_add(1, Ordering::SeqCst);
        }
        shutdown.triggered().await;
        self.tally.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFactory {
    scripts: Mutex<HashMap<String, Script>>,
    tallies: Mutex<HashMap<String, Arc<Tally>>>,
}

impl ScriptedFactory {
    fn script(&self, job_id: &str, script: Script) {
        self.scripts.lock().unwrap().insert(job_id.to_string(), script);
    }

    fn tally(&self, job_id: &str) -> Arc<Tally> {
        self.tallies.lock().unwrap()[job_id].clone()
    }
}

impl AdapterFactory for ScriptedFactory {
    fn build(&self, sub: &Subscription, endpoint: &Endpoint) -> Result<Box<dyn ProtocolAdapter>, AdapterError> {
        sub.validate_for(endpoint)?;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&sub.job_id)
            .cloned()
            .unwrap_or_default();
        let tally = Arc::new(Tally::default());
        self.tallies
            .lock()
            .unwrap()
            .insert(sub.job_id.clone(), tally.clone());
        Ok(Box::new(ScriptedAdapter {
            script,
            tally,
            ping: SourcePing::detached(),
        }))
    }
}

// ─── Recording trigger ──────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingTrigger {
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingTrigger {
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriggerClient for RecordingTrigger {
    async fn trigger_job(&self, job_id: &str, body: &[u8]) -> Result<(), TriggerError> {
        self.calls
            .lock()
            .unwrap()
            .push((job_id.to_string(), String::from_utf8_lossy(body).to_string()));
        if self.fail {
            return Err(TriggerError::Status {
                status: 502,
                body: String::new(),
            });
        }
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────────────

struct Harness {
    manager: SubscriptionManager,
    factory: Arc<ScriptedFactory>,
    trigger: Arc<RecordingTrigger>,
    store: Arc<InMemoryConfigStore>,
}

fn harness_with(trigger: RecordingTrigger, dispatch: DispatchConfig, snapshot: StoreSnapshot) -> Harness {
    let factory = Arc::new(ScriptedFactory::default());
    let trigger = Arc::new(trigger);
    let store = Arc::new(InMemoryConfigStore::from_snapshot(snapshot));
    let manager = SubscriptionManager::new(
        factory.clone(),
        Dispatcher::new(trigger.clone(), dispatch),
        store.clone(),
    )
    .with_event_buffer(1)
    .with_shutdown_grace(Duration::from_millis(500));
    Harness {
        manager,
        factory,
        trigger,
        store,
    }
}

fn harness() -> Harness {
    harness_with(RecordingTrigger::default(), quick_dispatch(), StoreSnapshot::default())
}

fn quick_dispatch() -> DispatchConfig {
    DispatchConfig {
        max_attempts: 3,
        retry_delay: Duration::from_millis(5),
        request_timeout: Duration::from_secs(1),
    }
}

fn endpoint() -> Endpoint {
    Endpoint::new("eth-node", "wss://node.example", ChainType::Ethereum)
}

fn sub(job_id: &str) -> Subscription {
    Subscription::new(job_id, "eth-node").with_addresses(["0xoracle"])
}

fn structured(job_id: &str, id: &str) -> RawChainEvent {
    let fields: CanonicalRequest = [("id", id)].into_iter().collect();
    RawChainEvent::Request(StructuredRequest {
        job_id: job_id.to_string(),
        fields,
    })
}

/// A runlog log whose CBOR parameters are `{"get": "https://a.io"}`.
fn runlog(job_id: &str, truncated: bool) -> RawChainEvent {
    let mut cbor = vec![0x63];
    cbor.extend_from_slice(b"get");
    cbor.push(0x6c);
    cbor.extend_from_slice(b"https://a.io");

    let mut data = vec![0u8; 256];
    data[63] = 7;
    let declared = if truncated { cbor.len() + 10 } else { cbor.len() };
    let mut length = [0u8; 32];
    length[24..].copy_from_slice(&(declared as u64).to_be_bytes());
    data.extend_from_slice(&length);
    data.extend_from_slice(&cbor);

    RawChainEvent::Log(LogEvent {
        address: "0xoracle".into(),
        topics: vec!["0xd8d7ecc4".into(), job_id_topic(job_id)],
        data,
        position: Some(1),
    })
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ─── Delivery ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn relays_only_requests_for_the_job() {
    let h = harness();
    h.factory.script(
        "job-1",
        Script {
            events: vec![
                structured("job-1", "a"),
                structured("job-2", "b"),
                runlog("job-1", true),
                runlog("job-2", false),
                runlog("job-1", false),
            ],
            ..Script::default()
        },
    );
    h.manager.add(sub("job-1"), &endpoint()).await.unwrap();

    eventually("two deliveries", || h.manager.dispatcher().stats().delivered == 2).await;
    let calls = h.trigger.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(job, _)| job == "job-1"));

    let bodies: Vec<serde_json::Value> = calls
        .iter()
        .map(|(_, body)| serde_json::from_str(body).unwrap())
        .collect();
    let runlog_body = bodies
        .iter()
        .find(|b| b.get("get").is_some())
        .expect("decoded runlog delivered");
    assert_eq!(runlog_body["get"], "https://a.io");
    assert_eq!(runlog_body["address"], "0xoracle");
    assert_eq!(runlog_body["functionSelector"], "0x4ab0d190");
    assert!(runlog_body["dataPrefix"].as_str().unwrap().starts_with("0x"));
    assert!(bodies.iter().any(|b| b["id"] == "a"));

    h.manager.shutdown_all().await;
}

#[tokio::test]
async fn failing_trigger_does_not_slow_ingestion() {
    let slow = DispatchConfig {
        max_attempts: 3,
        retry_delay: Duration::from_secs(30),
        request_timeout: Duration::from_secs(1),
    };
    let h = harness_with(
        RecordingTrigger {
            fail: true,
            ..RecordingTrigger::default()
        },
        slow,
        StoreSnapshot::default(),
    );
    let events = (0..50).map(|i| structured("job-1", &i.to_string())).collect();
    h.factory.script(
        "job-1",
        Script {
            events,
            ..Script::default()
        },
    );
    h.manager.add(sub("job-1"), &endpoint()).await.unwrap();

    let tally = h.factory.tally("job-1");
    eventually("all events handed off", || tally.emitted.load(Ordering::SeqCst) == 50).await;
    assert_eq!(h.manager.dispatcher().stats().delivered, 0);

    h.manager.shutdown_all().await;
}

#[tokio::test]
async fn source_ping_follows_adapter_activity() {
    let h = harness();
    h.factory.script(
        "job-1",
        Script {
            events: vec![structured("job-1", "a")],
            ..Script::default()
        },
    );
    h.manager.add(sub("job-1"), &endpoint()).await.unwrap();
    h.manager.add(sub("job-2"), &endpoint()).await.unwrap();

    eventually("a ping from job-1", || h.manager.last_source_ping("job-1").is_some()).await;
    assert_eq!(h.manager.last_source_ping("job-2"), None);

    h.manager.remove("job-1").await.unwrap();
    assert_eq!(h.manager.last_source_ping("job-1"), None);
    h.manager.shutdown_all().await;
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_job_keeps_the_first_subscription() {
    let h = harness();
    h.manager.add(sub("job-1"), &endpoint()).await.unwrap();
    let first = h.factory.tally("job-1");

    let err = h.manager.add(sub("job-1"), &endpoint()).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::DuplicateJob(ref j) if j == "job-1"));
    assert!(err.is_client_error());
    assert_eq!(h.manager.active_jobs(), vec!["job-1"]);
    assert!(Arc::ptr_eq(&first, &h.factory.tally("job-1")));
    assert!(!first.stopped.load(Ordering::SeqCst));

    h.manager.shutdown_all().await;
}

#[tokio::test]
async fn remove_stops_the_adapter() {
    let h = harness();
    assert!(matches!(
        h.manager.remove("job-1").await,
        Err(SubscriptionError::NotFound(_))
    ));

    h.manager.add(sub("job-1"), &endpoint()).await.unwrap();
    let tally = h.factory.tally("job-1");
    h.manager.remove("job-1").await.unwrap();
    assert!(tally.stopped.load(Ordering::SeqCst));
    assert!(!h.manager.is_active("job-1"));

    // The job can be added again once removed.
    h.manager.add(sub("job-1"), &endpoint()).await.unwrap();
    h.manager.shutdown_all().await;
}

#[tokio::test]
async fn failed_connection_test_activates_nothing() {
    let h = harness();
    h.factory.script(
        "job-1",
        Script {
            refuse_connection: true,
            ..Script::default()
        },
    );
    let err = h.manager.add(sub("job-1"), &endpoint()).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::Connection(_)));
    assert!(!err.is_client_error());
    assert!(h.manager.active_jobs().is_empty());
}

#[tokio::test]
async fn bad_configuration_is_a_client_error() {
    let h = harness();
    let bad = Endpoint::new("eth-node", "ftp://node.example", ChainType::Ethereum);
    let err = h.manager.add(sub("job-1"), &bad).await.unwrap_err();
    assert!(matches!(
        err,
        SubscriptionError::Config(ConfigError::UnsupportedScheme(_))
    ));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn shutdown_all_stops_every_subscription() {
    let h = harness();
    for job in ["job-a", "job-b", "job-c"] {
        h.manager.add(sub(job), &endpoint()).await.unwrap();
    }
    assert_eq!(h.manager.active_jobs(), vec!["job-a", "job-b", "job-c"]);

    h.manager.shutdown_all().await;
    assert!(h.manager.active_jobs().is_empty());
    for job in ["job-a", "job-b", "job-c"] {
        assert!(h.factory.tally(job).stopped.load(Ordering::SeqCst));
    }
}

// ─── Store ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bootstrap_skips_broken_subscriptions() {
    let snapshot = StoreSnapshot {
        endpoints: vec![endpoint()],
        subscriptions: vec![
            sub("job-1"),
            Subscription::new("job-2", "missing-node"),
            sub("job-3"),
        ],
    };
    let h = harness_with(RecordingTrigger::default(), quick_dispatch(), snapshot);
    h.factory.script(
        "job-3",
        Script {
            refuse_connection: true,
            ..Script::default()
        },
    );

    assert_eq!(h.manager.bootstrap().await.unwrap(), 1);
    assert_eq!(h.manager.active_jobs(), vec!["job-1"]);
    h.manager.shutdown_all().await;
}

#[tokio::test]
async fn register_and_unregister_persist() {
    let h = harness();
    h.manager.register_endpoint(&endpoint()).await.unwrap();
    let bad = Endpoint::new("", "wss://node.example", ChainType::Ethereum);
    assert!(matches!(
        h.manager.register_endpoint(&bad).await,
        Err(SubscriptionError::Config(ConfigError::MissingEndpointName))
    ));

    h.manager.register(sub("job-1")).await.unwrap();
    assert!(h.manager.is_active("job-1"));
    assert_eq!(h.store.subscription_count(), 1);

    assert!(matches!(
        h.manager.register(Subscription::new("job-2", "missing-node")).await,
        Err(SubscriptionError::Store(_))
    ));

    h.manager.unregister("job-1").await.unwrap();
    assert!(!h.manager.is_active("job-1"));
    assert!(h.store.load_subscriptions().await.unwrap().is_empty());
}
