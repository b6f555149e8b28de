//! Client for the job execution node's run trigger API.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub const ACCESS_KEY_HEADER: &str = "X-Chainlink-EA-AccessKey";
pub const SECRET_HEADER: &str = "X-Chainlink-EA-Secret";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger request failed: {0}")]
    Transport(String),

    #[error("trigger request timed out")]
    Timeout,

    #[error("trigger API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to build trigger client: {0}")]
    Client(String),
}

impl TriggerError {
    /// Transport failures and 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Client(_) => false,
        }
    }
}

/// Starts a job run for one request.
#[async_trait]
pub trait TriggerClient: Send + Sync + 'static {
    /// `body` is the request serialized as a flat JSON object.
    async fn trigger_job(&self, job_id: &str, body: &[u8]) -> Result<(), TriggerError>;
}

/// `POST {base}/v2/specs/{job_id}/runs` with the access key headers.
pub struct HttpTriggerClient {
    base: String,
    access_key: String,
    secret: String,
    http: reqwest::Client,
}

impl HttpTriggerClient {
    pub fn new(base_url: &str, access_key: &str, secret: &str, timeout: Duration) -> Result<Self, TriggerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TriggerError::Client(e.to_string()))?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret: secret.to_string(),
            http,
        })
    }

    fn run_url(&self, job_id: &str) -> String {
        format!("{}/v2/specs/{job_id}/runs", self.base)
    }
}

#[async_trait]
impl TriggerClient for HttpTriggerClient {
    async fn trigger_job(&self, job_id: &str, body: &[u8]) -> Result<(), TriggerError> {
        let resp = self
            .http
            .post(self.run_url(job_id))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(SECRET_HEADER, &self.secret)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TriggerError::Timeout
                } else {
                    TriggerError::Transport(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(TriggerError::Status { status, body });
        }
        tracing::debug!(job_id, status, "job run triggered");
        Ok(())
    }
}
