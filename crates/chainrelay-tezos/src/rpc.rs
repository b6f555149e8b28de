//! The Tezos node RPC seam and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

use chainrelay_core::error::TransportError;

/// Stream of raw `/monitor/heads/main` lines.
pub type HeadLines = BoxStream<'static, Result<String, TransportError>>;

/// The three node calls the Tezos adapter needs.
#[async_trait]
pub trait TezosRpc: Send + Sync + 'static {
    /// Open the head monitor. Fails if the node does not stream heads.
    async fn monitor_heads(&self) -> Result<HeadLines, TransportError>;

    /// `GET /chains/main/blocks/{hash}/operations`.
    async fn block_operations(&self, block_hash: &str) -> Result<Value, TransportError>;

    /// `POST /chains/main/blocks/head/context/contracts/{address}/script/normalized`.
    async fn contract_script(&self, address: &str) -> Result<Value, TransportError>;

    fn url(&self) -> &str;
}

/// reqwest-backed [`TezosRpc`].
pub struct HttpTezosRpc {
    base: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTezosRpc {
    /// `request_timeout` applies to single requests, not the monitor stream.
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base: url.trim_end_matches('/').to_string(),
            http,
            request_timeout,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }

    async fn read_json(&self, resp: reqwest::Response) -> Result<Value, TransportError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {}: {body}", status.as_u16())));
        }
        let bytes = resp.bytes().await.map_err(|e| self.map_error(e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TezosRpc for HttpTezosRpc {
    async fn monitor_heads(&self) -> Result<HeadLines, TransportError> {
        let resp = self
            .http
            .get(format!("{}/monitor/heads/main", self.base))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        match resp.status().as_u16() {
            200 => Ok(lines(resp)),
            400 => Err(TransportError::Http(format!(
                "{} returned 400. This endpoint may not support calls to /monitor",
                self.base
            ))),
            other => Err(TransportError::Http(format!(
                "unexpected status code {other} from endpoint {}",
                self.base
            ))),
        }
    }

    async fn block_operations(&self, block_hash: &str) -> Result<Value, TransportError> {
        let resp = self
            .http
            .get(format!("{}/chains/main/blocks/{block_hash}/operations", self.base))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.read_json(resp).await
    }

    async fn contract_script(&self, address: &str) -> Result<Value, TransportError> {
        let resp = self
            .http
            .post(format!(
                "{}/chains/main/blocks/head/context/contracts/{address}/script/normalized",
                self.base
            ))
            .json(&json!({ "unparsing_mode": "Optimized" }))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.read_json(resp).await
    }

    fn url(&self) -> &str {
        &self.base
    }
}

/// Split a chunked body into non-empty lines. A trailing line without a
/// newline is still yielded when the body ends.
fn lines(resp: reqwest::Response) -> HeadLines {
    stream::unfold(
        (Some(resp), Vec::<u8>::new()),
        |(mut resp, mut buf)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line).trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    return Some((Ok(line), (resp, buf)));
                }
                let Some(body) = resp.as_mut() else {
                    let rest = String::from_utf8_lossy(&buf).trim().to_string();
                    if rest.is_empty() {
                        return None;
                    }
                    return Some((Ok(rest), (None, Vec::new())));
                };
                match body.chunk().await {
                    Ok(Some(bytes)) => buf.extend_from_slice(&bytes),
                    Ok(None) => resp = None,
                    Err(e) => {
                        return Some((Err(TransportError::Http(e.to_string())), (None, Vec::new())))
                    }
                }
            }
        },
    )
    .boxed()
}
