//! Reconnect backoff for persistent (push) connections.
//!
//! The delay ramps linearly for the first few attempts, then flattens:
//!
//! ```text
//! attempt:  1   2   3   4   5+
//! delay:    2s  4s  6s  8s  10s
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Linear-then-flat reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectBackoff {
    /// Delay added per failed attempt while ramping.
    #[serde(default = "default_step", with = "duration_secs")]
    pub step: Duration,
    /// Attempts below this count ramp; at or above it the ceiling applies.
    #[serde(default = "default_ramp_attempts")]
    pub ramp_attempts: u32,
    /// Delay once ramping is over.
    #[serde(default = "default_ceiling", with = "duration_secs")]
    pub ceiling: Duration,
}

fn default_step() -> Duration {
    Duration::from_secs(2)
}

fn default_ramp_attempts() -> u32 {
    5
}

fn default_ceiling() -> Duration {
    Duration::from_secs(10)
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            step: default_step(),
            ramp_attempts: default_ramp_attempts(),
            ceiling: default_ceiling(),
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt < self.ramp_attempts {
            self.step * attempt.max(1)
        } else {
            self.ceiling
        }
    }
}

/// Serialize a `Duration` as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
