//! Delivery of canonical requests to the trigger API.
//!
//! Each request is delivered on its own detached task with a bounded,
//! fixed-delay retry. The producer never waits on delivery: a slow or failing
//! trigger API cannot hold up chain ingestion. After the last attempt the
//! request is dropped and counted as failed.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use chainrelay_core::CanonicalRequest;

use crate::config::DispatchConfig;
use crate::trigger::{TriggerClient, TriggerError};

/// Delivery counters.
#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn TriggerClient>,
    config: DispatchConfig,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn TriggerClient>, config: DispatchConfig) -> Self {
        Self {
            client,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Deliver `request` for `job_id` in the background.
    ///
    /// The returned handle may be dropped; the task keeps running.
    pub fn send(&self, job_id: &str, request: CanonicalRequest) -> JoinHandle<()> {
        let job_id = job_id.to_string();
        let client = Arc::clone(&self.client);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();

        tokio::spawn(async move {
            let body = match request.to_json_bytes() {
                Ok(body) => Arc::new(body),
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(job_id = %job_id, error = %e, "failed to serialize request");
                    return;
                }
            };

            let retries = config.max_attempts.saturating_sub(1) as usize;
            let strategy = FixedInterval::new(config.retry_delay).take(retries);
            let attempt = AtomicU32::new(0);
            let delay_ms = config.retry_delay.as_millis() as u64;

            let result = RetryIf::spawn(
                strategy,
                || {
                    let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
                    let client = Arc::clone(&client);
                    let body = Arc::clone(&body);
                    let job_id = job_id.clone();
                    async move {
                        client.trigger_job(&job_id, &body).await.map_err(|e| {
                            tracing::warn!(
                                job_id = %job_id,
                                attempt = n,
                                delay_ms,
                                error = %e,
                                "trigger attempt failed"
                            );
                            e
                        })
                    }
                },
                |e: &TriggerError| e.is_retryable(),
            )
            .await;

            match result {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(job_id = %job_id, "job run triggered");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        job_id = %job_id,
                        attempts = attempt.load(Ordering::Relaxed),
                        error = %e,
                        "dropping request after failed delivery"
                    );
                }
            }
        })
    }
}
