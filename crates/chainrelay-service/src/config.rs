//! Relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainrelay_core::policy::backoff::duration_secs;
use chainrelay_substrate::SubstrateConfig;
use chainrelay_ws::WsConfig;

use crate::logging::LogConfig;

/// Everything the relay needs besides the subscriptions themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Base URL of the job execution node.
    pub chainlink_url: String,
    pub access_key: String,
    pub secret: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Events buffered between an adapter and its pump task.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Grace period for adapter tasks on shutdown.
    #[serde(default = "default_shutdown_grace", with = "duration_secs")]
    pub shutdown_grace: Duration,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub substrate: SubstrateConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_event_buffer() -> usize {
    64
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

impl RelayConfig {
    pub fn new(chainlink_url: &str, access_key: &str, secret: &str) -> Self {
        Self {
            chainlink_url: normalize_localhost(chainlink_url),
            access_key: access_key.to_string(),
            secret: secret.to_string(),
            dispatch: DispatchConfig::default(),
            event_buffer: default_event_buffer(),
            shutdown_grace: default_shutdown_grace(),
            ws: WsConfig::default(),
            substrate: SubstrateConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Trigger API retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// `localhost:6688` → `http://localhost:6688`. Other URLs are returned as is.
pub fn normalize_localhost(url: &str) -> String {
    if url.starts_with("localhost") {
        format!("http://{url}")
    } else {
        url.to_string()
    }
}
