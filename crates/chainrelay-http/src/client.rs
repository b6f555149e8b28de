//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Every request carries a fixed timeout. There is no retry here: poll
//! adapters treat a failed request as a skipped tick and try again on the
//! next one.

use std::time::Duration;

use async_trait::async_trait;

use chainrelay_core::error::TransportError;
use chainrelay_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainrelay_core::transport::{RequestIds, RpcTransport};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP JSON-RPC client.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    ids: RequestIds,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            request_timeout: config.request_timeout,
            ids: RequestIds::new(),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
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
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::trace!(url = %self.url, method = %req.method, id = %req.id, "sending request");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let bytes = resp.bytes().await.map_err(|e| self.map_error(e))?;
        Ok(serde_json::from_slice::<JsonRpcResponse>(&bytes)?)
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.ids.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response on a random local port.
    async fn one_shot_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(resp.as_bytes()).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn call_returns_result() {
        let url = one_shot_server("200 OK", r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).await;
        let client = HttpRpcClient::default_for(url).unwrap();
        let head = client.call("eth_blockNumber", vec![]).await.unwrap();
        assert_eq!(head, "0x10");
    }

    #[tokio::test]
    async fn node_error_is_rpc_error() {
        let url = one_shot_server(
            "200 OK",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"query returned more than 10000 results"}}"#,
        )
        .await;
        let client = HttpRpcClient::default_for(url).unwrap();
        let err = client.call("eth_getLogs", vec![]).await.unwrap_err();
        assert!(matches!(err, TransportError::Rpc(ref e) if e.code == -32005));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn bad_status_is_http_error() {
        let url = one_shot_server("502 Bad Gateway", "{}").await;
        let client = HttpRpcClient::default_for(url).unwrap();
        let err = client.call("eth_blockNumber", vec![]).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn silent_node_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client = HttpRpcClient::new(
            format!("http://{addr}"),
            HttpClientConfig {
                request_timeout: Duration::from_millis(200),
            },
        )
        .unwrap();
        let err = client.call("eth_blockNumber", vec![]).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { ms: 200 }));
    }

    #[test]
    fn ids_increase() {
        let client = HttpRpcClient::default_for("http://localhost:8545").unwrap();
        let a = client.next_id();
        let b = client.next_id();
        assert!(b > a);
    }
}
