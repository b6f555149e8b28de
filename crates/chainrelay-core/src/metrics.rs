//! Relay metrics.
//!
//! Instruments are plain OpenTelemetry handles. Without an installed meter
//! provider they record nothing, so adapters can touch them unconditionally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use opentelemetry::global;
use opentelemetry::metrics::{Gauge, Meter};
use opentelemetry::KeyValue;

/// Name of the meter used when no other is supplied.
pub const METER_NAME: &str = "chainrelay";

/// Central metrics handle for the relay.
#[derive(Clone)]
pub struct RelayMetrics {
    pub last_source_ping: Gauge<f64>,
}

impl RelayMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            last_source_ping: meter
                .f64_gauge("chainrelay.last_source_ping")
                .with_description("Unix time of the last message or poll answer from a source node")
                .with_unit("s")
                .build(),
        }
    }

    /// Instruments on the global meter provider.
    pub fn global() -> Self {
        Self::new(&global::meter(METER_NAME))
    }

    /// Liveness handle for one (endpoint, job) pair.
    pub fn source_ping(&self, endpoint: &str, job_id: &str) -> SourcePing {
        SourcePing {
            gauge: self.last_source_ping.clone(),
            attributes: Arc::new([
                KeyValue::new("endpoint", endpoint.to_string()),
                KeyValue::new("jobid", job_id.to_string()),
            ]),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for RelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayMetrics").finish_non_exhaustive()
    }
}

/// Records that a source node showed a sign of life.
///
/// Clones share the same last-seen timestamp.
#[derive(Clone)]
pub struct SourcePing {
    gauge: Gauge<f64>,
    attributes: Arc<[KeyValue; 2]>,
    last_ms: Arc<AtomicU64>,
}

impl SourcePing {
    /// A handle with empty labels, for adapters used outside a manager.
    pub fn detached() -> Self {
        RelayMetrics::global().source_ping("", "")
    }

    /// Set the gauge to the current time.
    pub fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.last_ms.store(now.as_millis() as u64, Ordering::Relaxed);
        self.gauge.record(now.as_secs_f64(), self.attributes.as_slice());
    }

    /// Time of the last `touch`, if any.
    pub fn last_seen(&self) -> Option<SystemTime> {
        match self.last_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }
}

impl Default for SourcePing {
    fn default() -> Self {
        Self::detached()
    }
}

impl std::fmt::Debug for SourcePing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePing")
            .field("attributes", &self.attributes)
            .field("last_seen", &self.last_seen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_ping_has_no_timestamp() {
        let ping = RelayMetrics::global().source_ping("eth-1", "job-1");
        assert_eq!(ping.last_seen(), None);
    }

    #[test]
    fn touch_is_shared_between_clones() {
        let before = SystemTime::now() - Duration::from_millis(5);
        let ping = RelayMetrics::global().source_ping("eth-1", "job-1");
        let adapter_side = ping.clone();
        adapter_side.touch();
        let seen = ping.last_seen().unwrap();
        assert!(seen >= before);
        assert!(seen <= SystemTime::now());
    }

    #[test]
    fn labels_name_endpoint_and_job() {
        let ping = RelayMetrics::global().source_ping("eth-1", "job-1");
        let labels: Vec<(String, String)> = ping
            .attributes
            .iter()
            .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
            .collect();
        assert_eq!(
            labels,
            [("endpoint", "eth-1"), ("jobid", "job-1")]
                .map(|(k, v)| (k.to_string(), v.to_string()))
        );
    }
}
