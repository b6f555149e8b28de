//! `SubscriptionManager`: at most one live subscription per job.
//!
//! Each active subscription owns two tasks:
//!
//! ```text
//! adapter task ── EventSink (bounded) ──▶ pump task ──▶ normalize ──▶ Dispatcher::send
//!      ▲                                                               (detached)
//!      └── ShutdownTrigger
//! ```
//!
//! The job map is the only state shared between subscriptions. It is held
//! behind one mutex that is never locked across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chainrelay_core::adapter::{shutdown_channel, Shutdown, ShutdownTrigger};
use chainrelay_core::error::{AdapterError, SubscriptionError};
use chainrelay_core::metrics::{RelayMetrics, SourcePing};
use chainrelay_core::{ConfigStore, Endpoint, RawChainEvent, Subscription};

use crate::config::RelayConfig;
use crate::dispatcher::Dispatcher;
use crate::factory::{AdapterFactory, DefaultAdapterFactory};
use crate::normalize::normalize;
use crate::trigger::{HttpTriggerClient, TriggerError};

struct ActiveSubscription {
    endpoint_name: String,
    trigger: ShutdownTrigger,
    ping: SourcePing,
    adapter_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

pub struct SubscriptionManager {
    factory: Arc<dyn AdapterFactory>,
    dispatcher: Dispatcher,
    store: Arc<dyn ConfigStore>,
    active: Mutex<HashMap<String, ActiveSubscription>>,
    metrics: RelayMetrics,
    event_buffer: usize,
    shutdown_grace: Duration,
}

/// Configuration problems are the caller's fault; anything else means the
/// node could not be reached.
fn adapter_error(e: AdapterError) -> SubscriptionError {
    match e {
        AdapterError::Config(c) => SubscriptionError::Config(c),
        other => SubscriptionError::Connection(other),
    }
}

impl SubscriptionManager {
    pub fn new(factory: Arc<dyn AdapterFactory>, dispatcher: Dispatcher, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            factory,
            dispatcher,
            store,
            active: Mutex::new(HashMap::new()),
            metrics: RelayMetrics::global(),
            event_buffer: 64,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Wire the default adapters and the HTTP trigger client from `config`.
    pub fn from_config(config: &RelayConfig, store: Arc<dyn ConfigStore>) -> Result<Self, TriggerError> {
        let client = HttpTriggerClient::new(
            &config.chainlink_url,
            &config.access_key,
            &config.secret,
            config.dispatch.request_timeout,
        )?;
        let factory = DefaultAdapterFactory {
            ws: config.ws.clone(),
            substrate: config.substrate.clone(),
            request_timeout: config.dispatch.request_timeout,
        };
        Ok(Self::new(
            Arc::new(factory),
            Dispatcher::new(Arc::new(client), config.dispatch.clone()),
            store,
        )
        .with_event_buffer(config.event_buffer)
        .with_shutdown_grace(config.shutdown_grace))
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_metrics(mut self, metrics: RelayMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.lock().unwrap().contains_key(job_id)
    }

    /// When the source of an active job last answered or pushed a message.
    pub fn last_source_ping(&self, job_id: &str) -> Option<SystemTime> {
        self.active
            .lock()
            .unwrap()
            .get(job_id)
            .and_then(|entry| entry.ping.last_seen())
    }

    /// Active job ids, sorted.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.active.lock().unwrap().keys().cloned().collect();
        jobs.sort();
        jobs
    }

    /// Start `sub` on `endpoint`.
    ///
    /// Fails without side effects if the job is already active, the
    /// configuration is invalid, or the connection test fails.
    pub async fn add(&self, sub: Subscription, endpoint: &Endpoint) -> Result<(), SubscriptionError> {
        if self.is_active(&sub.job_id) {
            return Err(SubscriptionError::DuplicateJob(sub.job_id));
        }

        let mut adapter = self.factory.build(&sub, endpoint).map_err(adapter_error)?;
        let ping = self.metrics.source_ping(&endpoint.name, &sub.job_id);
        adapter.set_source_ping(ping.clone());
        adapter.test_connection().await.map_err(adapter_error)?;

        let mut active = self.active.lock().unwrap();
        // Another add for this job may have finished while we were testing.
        if active.contains_key(&sub.job_id) {
            return Err(SubscriptionError::DuplicateJob(sub.job_id));
        }

        let (sink, events) = mpsc::channel(self.event_buffer);
        let (trigger, shutdown) = shutdown_channel();
        let pump_shutdown = shutdown.clone();
        let job_id = sub.job_id.clone();

        let adapter_task = {
            let job_id = job_id.clone();
            tokio::spawn(async move {
                let result = adapter.run(sink, shutdown).await;
                if let Err(e) = result {
                    tracing::error!(job_id = %job_id, adapter = %adapter.name(), error = %e, "adapter stopped with error");
                }
            })
        };
        let pump_task = tokio::spawn(pump(
            job_id.clone(),
            events,
            self.dispatcher.clone(),
            pump_shutdown,
        ));

        tracing::info!(job_id = %job_id, endpoint = %endpoint.name, chain = %endpoint.chain, "subscription active");
        active.insert(
            job_id,
            ActiveSubscription {
                endpoint_name: endpoint.name.clone(),
                trigger,
                ping,
                adapter_task,
                pump_task,
            },
        );
        Ok(())
    }

    /// Stop the subscription for `job_id`.
    pub async fn remove(&self, job_id: &str) -> Result<(), SubscriptionError> {
        let entry = self
            .active
            .lock()
            .unwrap()
            .remove(job_id)
            .ok_or_else(|| SubscriptionError::NotFound(job_id.to_string()))?;
        tracing::info!(job_id = %job_id, endpoint = %entry.endpoint_name, "unsubscribing");
        self.stop(job_id, entry).await;
        Ok(())
    }

    /// Persist and activate a subscription whose endpoint is in the store.
    pub async fn register(&self, sub: Subscription) -> Result<(), SubscriptionError> {
        let endpoint = self.store.load_endpoint(&sub.endpoint_name).await?;
        self.add(sub.clone(), &endpoint).await?;
        if let Err(e) = self.store.save_subscription(&sub).await {
            let _ = self.remove(&sub.job_id).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Validate and store an endpoint.
    pub async fn register_endpoint(&self, endpoint: &Endpoint) -> Result<(), SubscriptionError> {
        endpoint.validate()?;
        self.store.save_endpoint(endpoint).await?;
        Ok(())
    }

    /// Deactivate and forget a subscription.
    pub async fn unregister(&self, job_id: &str) -> Result<(), SubscriptionError> {
        self.remove(job_id).await?;
        self.store.delete_subscription(job_id).await?;
        Ok(())
    }

    /// Activate every stored subscription. Individual failures are logged.
    ///
    /// Returns the number of subscriptions activated.
    pub async fn bootstrap(&self) -> Result<usize, SubscriptionError> {
        let subs = self.store.load_subscriptions().await?;
        let total = subs.len();
        let mut started = 0;

        for sub in subs {
            let job_id = sub.job_id.clone();
            let endpoint = match self.store.load_endpoint(&sub.endpoint_name).await {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "skipping subscription");
                    continue;
                }
            };
            match self.add(sub, &endpoint).await {
                Ok(()) => started += 1,
                Err(e) => tracing::error!(job_id = %job_id, error = %e, "failed to start subscription"),
            }
        }

        tracing::info!(started, total, "subscriptions bootstrapped");
        Ok(started)
    }

    /// Stop every subscription.
    pub async fn shutdown_all(&self) {
        let entries: Vec<(String, ActiveSubscription)> = self.active.lock().unwrap().drain().collect();
        tracing::info!(count = entries.len(), "shutting down subscriptions");
        for (_, entry) in &entries {
            entry.trigger.trigger();
        }
        for (job_id, entry) in entries {
            self.stop(&job_id, entry).await;
        }
    }

    /// Signal, then wait up to the grace period before aborting.
    async fn stop(&self, job_id: &str, entry: ActiveSubscription) {
        entry.trigger.trigger();
        let ActiveSubscription {
            mut adapter_task,
            mut pump_task,
            ..
        } = entry;

        if tokio::time::timeout(self.shutdown_grace, &mut adapter_task).await.is_err() {
            tracing::warn!(job_id = %job_id, grace_ms = self.shutdown_grace.as_millis() as u64, "adapter did not stop in time, aborting");
            adapter_task.abort();
        }
        if tokio::time::timeout(self.shutdown_grace, &mut pump_task).await.is_err() {
            pump_task.abort();
        }
    }
}

/// Forward one subscription's events to the dispatcher, in order.
///
/// Events still buffered when `shutdown` fires are dropped.
async fn pump(
    job_id: String,
    mut events: mpsc::Receiver<RawChainEvent>,
    dispatcher: Dispatcher,
    mut shutdown: Shutdown,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if shutdown.is_triggered() {
            break;
        }
        match normalize(&job_id, event) {
            Ok(Some(request)) => {
                dispatcher.send(&job_id, request);
            }
            Ok(None) => tracing::debug!(job_id = %job_id, "event for another job"),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "dropping undecodable event"),
        }
    }
    tracing::debug!(job_id = %job_id, "event pump finished");
}
