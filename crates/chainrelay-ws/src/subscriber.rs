//! WebSocket push subscription with auto-reconnect.
//!
//! ```text
//! connect ──▶ send subscribe ──▶ await ack ──▶ forward notifications ──┐
//!    ▲            (timeout)        (timeout)                            │
//!    └──────────── backoff ◀──── any I/O failure ◀─────────────────────┘
//!                                  shutdown ──▶ send unsubscribe ──▶ close
//! ```

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainrelay_core::adapter::Shutdown;
use chainrelay_core::error::TransportError;
use chainrelay_core::policy::backoff::duration_secs;
use chainrelay_core::policy::ReconnectBackoff;
use chainrelay_core::request::{JsonRpcRequest, JsonRpcResponse, RpcId, SubscriptionNotification};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;

/// Timeouts and backoff for push connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub handshake_timeout: Duration,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub ack_timeout: Duration,
    #[serde(default)]
    pub backoff: ReconnectBackoff,
    /// Notifications buffered between the socket task and the adapter.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_buffer() -> usize {
    64
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: default_timeout(),
            ack_timeout: default_timeout(),
            backoff: ReconnectBackoff::default(),
            buffer: default_buffer(),
        }
    }
}

/// The subscribe/unsubscribe pair for one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeSpec {
    /// e.g. `eth_subscribe`, `state_subscribeStorage`.
    pub method: String,
    pub params: Vec<Value>,
    /// e.g. `eth_unsubscribe`; called with `[subscription_id]`.
    pub unsubscribe_method: String,
}

/// One push subscription against one node.
#[derive(Debug, Clone)]
pub struct WsSubscriber {
    url: String,
    spec: SubscribeSpec,
    config: WsConfig,
}

enum SessionEnd {
    Shutdown,
    ConsumerGone,
    Failed(TransportError),
}

impl WsSubscriber {
    pub fn new(url: impl Into<String>, spec: SubscribeSpec, config: WsConfig) -> Self {
        Self {
            url: url.into(),
            spec,
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn spec(&self) -> &SubscribeSpec {
        &self.spec
    }

    /// Open and close one connection to check the node is reachable.
    pub async fn check_connection(&self) -> Result<(), TransportError> {
        let mut ws = connect(&self.url, self.config.handshake_timeout).await?;
        if let Err(e) = ws.close(None).await {
            tracing::debug!(url = %self.url, error = %e, "close after connection check failed");
        }
        Ok(())
    }

    /// Start the background task.
    ///
    /// The returned receiver yields each notification's `result` in arrival
    /// order and closes once the task has stopped.
    pub fn spawn(self, shutdown: Shutdown) -> (mpsc::Receiver<Value>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let handle = tokio::spawn(async move { self.run(tx, shutdown).await });
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<Value>, mut shutdown: Shutdown) {
        let mut attempts = 0u32;
        loop {
            if shutdown.is_triggered() {
                return;
            }
            tracing::info!(url = %self.url, method = %self.spec.method, "connecting via WebSocket");
            match self.session(&tx, &mut shutdown, &mut attempts).await {
                SessionEnd::Shutdown => {
                    tracing::info!(url = %self.url, "push subscription closed");
                    return;
                }
                SessionEnd::ConsumerGone => return,
                SessionEnd::Failed(e) => {
                    attempts = attempts.saturating_add(1);
                    let delay = self.config.backoff.delay(attempts);
                    tracing::warn!(
                        url = %self.url,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "WS session ended, reconnecting"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.triggered() => return,
                        _ = time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<Value>,
        shutdown: &mut Shutdown,
        attempts: &mut u32,
    ) -> SessionEnd {
        let ws = tokio::select! {
            biased;
            _ = shutdown.triggered() => return SessionEnd::Shutdown,
            res = connect(&self.url, self.config.handshake_timeout) => match res {
                Ok(ws) => ws,
                Err(e) => return SessionEnd::Failed(e),
            },
        };
        let (mut sink, mut stream) = ws.split();

        let subscribe = JsonRpcRequest::new(SUBSCRIBE_ID, &self.spec.method, self.spec.params.clone());
        if let Err(e) = send_json(&mut sink, &subscribe).await {
            return SessionEnd::Failed(e);
        }

        let sub_id = match await_ack(&mut stream, self.config.ack_timeout, shutdown).await {
            Ok(Some(id)) => id,
            Ok(None) => return SessionEnd::Shutdown,
            Err(e) => return SessionEnd::Failed(e),
        };
        *attempts = 0;
        tracing::info!(url = %self.url, subscription = %sub_id, "subscribed");

        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    self.unsubscribe(&mut sink, &sub_id).await;
                    return SessionEnd::Shutdown;
                }
                msg = stream.next() => msg,
            };
            let text = match msg {
                None => return SessionEnd::Failed(TransportError::WebSocket("stream closed".into())),
                Some(Err(e)) => return SessionEnd::Failed(TransportError::WebSocket(e.to_string())),
                Some(Ok(Message::Close(_))) => {
                    return SessionEnd::Failed(TransportError::WebSocket("closed by node".into()))
                }
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
            };
            let notification = match serde_json::from_str::<SubscriptionNotification>(&text) {
                Ok(n) => n,
                Err(_) => {
                    tracing::debug!(url = %self.url, "ignoring non-notification WS message");
                    continue;
                }
            };
            if notification.params.subscription_id() != sub_id {
                tracing::debug!(url = %self.url, method = %notification.method, "notification for another subscription");
                continue;
            }
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    self.unsubscribe(&mut sink, &sub_id).await;
                    return SessionEnd::Shutdown;
                }
                res = tx.send(notification.params.result) => {
                    if res.is_err() {
                        return SessionEnd::ConsumerGone;
                    }
                }
            }
        }
    }

    /// Best-effort unsubscribe and close; failures are only logged.
    async fn unsubscribe(&self, sink: &mut WsSink, sub_id: &str) {
        let req = JsonRpcRequest::new(
            UNSUBSCRIBE_ID,
            &self.spec.unsubscribe_method,
            vec![Value::String(sub_id.to_string())],
        );
        if let Err(e) = send_json(sink, &req).await {
            tracing::warn!(url = %self.url, subscription = %sub_id, error = %e, "unsubscribe failed");
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(url = %self.url, error = %e, "WS close failed");
        }
    }
}

/// Open a connection, make one request, and close it again.
///
/// `timeout` bounds the handshake and the response wait separately.
pub async fn call_once(
    url: &str,
    method: &str,
    params: Vec<Value>,
    timeout: Duration,
) -> Result<Value, TransportError> {
    let ws = connect(url, timeout).await?;
    let (mut sink, mut stream) = ws.split();
    send_json(&mut sink, &JsonRpcRequest::new(SUBSCRIBE_ID, method, params)).await?;

    let deadline = Instant::now() + timeout;
    let result = loop {
        let msg = match time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                break Err(TransportError::Timeout {
                    ms: timeout.as_millis() as u64,
                })
            }
            Ok(None) => break Err(TransportError::WebSocket("stream closed".into())),
            Ok(Some(Err(e))) => break Err(TransportError::WebSocket(e.to_string())),
            Ok(Some(Ok(msg))) => msg,
        };
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<JsonRpcResponse>(&text) {
            Ok(resp) if resp.id == RpcId::Number(SUBSCRIBE_ID) => {
                break resp.into_result().map_err(TransportError::Rpc)
            }
            _ => continue,
        }
    };
    if let Err(e) = sink.close().await {
        tracing::debug!(url = %url, error = %e, "WS close failed");
    }
    result
}

async fn connect(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    match time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Err(_) => Err(TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
        Ok(Err(e)) => Err(TransportError::WebSocket(e.to_string())),
        Ok(Ok((ws, _))) => Ok(ws),
    }
}

async fn send_json(sink: &mut WsSink, req: &JsonRpcRequest) -> Result<(), TransportError> {
    let text = serde_json::to_string(req)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}

/// Wait for the subscribe response. `Ok(None)` means shutdown won the race.
async fn await_ack(
    stream: &mut WsSource,
    timeout: Duration,
    shutdown: &mut Shutdown,
) -> Result<Option<String>, TransportError> {
    let deadline = Instant::now() + timeout;
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.triggered() => return Ok(None),
            next = time::timeout_at(deadline, stream.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                return Err(TransportError::Timeout {
                    ms: timeout.as_millis() as u64,
                })
            }
            Ok(None) => {
                return Err(TransportError::WebSocket(
                    "connection closed before subscribe ack".into(),
                ))
            }
            Ok(Some(Err(e))) => return Err(TransportError::WebSocket(e.to_string())),
            Ok(Some(Ok(msg))) => msg,
        };
        let Message::Text(text) = msg else { continue };
        let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&text) else {
            continue;
        };
        if resp.id != RpcId::Number(SUBSCRIBE_ID) {
            continue;
        }
        return match resp.into_result().map_err(TransportError::Rpc)? {
            Value::String(id) => Ok(Some(id)),
            Value::Number(n) => Ok(Some(n.to_string())),
            other => Err(TransportError::UnexpectedResponse(format!(
                "subscription id {other}"
            ))),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainrelay_core::adapter::shutdown_channel;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn spec() -> SubscribeSpec {
        SubscribeSpec {
            method: "eth_subscribe".into(),
            params: vec![Value::String("logs".into())],
            unsubscribe_method: "eth_unsubscribe".into(),
        }
    }

    fn fast_config() -> WsConfig {
        WsConfig {
            handshake_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(2),
            backoff: ReconnectBackoff {
                step: Duration::from_millis(10),
                ramp_attempts: 5,
                ceiling: Duration::from_millis(50),
            },
            buffer: 8,
        }
    }

    fn text_of(msg: Message) -> String {
        match msg {
            Message::Text(t) => t.to_string(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwards_notifications_and_unsubscribes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(sock).await.unwrap();
            let sub: Value = serde_json::from_str(&text_of(ws.next().await.unwrap().unwrap())).unwrap();
            seen_tx.send(sub).unwrap();
            ws.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xother","result":{"n":0}}}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xabc","result":{"n":1}}}"#.into(),
            ))
            .await
            .unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(t) = msg {
                    seen_tx.send(serde_json::from_str(t.as_str()).unwrap()).unwrap();
                }
            }
        });

        let (trigger, shutdown) = shutdown_channel();
        let subscriber = WsSubscriber::new(format!("ws://{addr}"), spec(), fast_config());
        let (mut rx, handle) = subscriber.spawn(shutdown);

        let sub = seen_rx.recv().await.unwrap();
        assert_eq!(sub["method"], "eth_subscribe");
        assert_eq!(sub["params"][0], "logs");

        let first = rx.recv().await.unwrap();
        assert_eq!(first["n"], 1);

        trigger.trigger();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());

        let unsub = seen_rx.recv().await.unwrap();
        assert_eq!(unsub["method"], "eth_unsubscribe");
        assert_eq!(unsub["params"][0], "0xabc");
    }

    #[tokio::test]
    async fn resubscribes_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for round in 0..2u64 {
                let (sock, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(sock).await.unwrap();
                let _subscribe = ws.next().await.unwrap().unwrap();
                ws.send(Message::Text(
                    format!(r#"{{"jsonrpc":"2.0","id":1,"result":"0x{round}"}}"#).into(),
                ))
                .await
                .unwrap();
                ws.send(Message::Text(
                    format!(
                        r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":"0x{round}","result":{round}}}}}"#
                    )
                    .into(),
                ))
                .await
                .unwrap();
                if round == 0 {
                    // Drop the connection to force a reconnect.
                    drop(ws);
                } else {
                    while ws.next().await.is_some() {}
                }
            }
        });

        let (trigger, shutdown) = shutdown_channel();
        let subscriber = WsSubscriber::new(format!("ws://{addr}"), spec(), fast_config());
        let (mut rx, handle) = subscriber.spawn(shutdown);

        assert_eq!(rx.recv().await.unwrap(), 0);
        assert_eq!(rx.recv().await.unwrap(), 1);

        trigger.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_on_subscribe_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(sock).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no logs"}}"#.into(),
            ))
            .await
            .unwrap();
            // Second connection succeeds.
            let (sock, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(sock).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":7}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":7,"result":"ok"}}"#.into(),
            ))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let (trigger, shutdown) = shutdown_channel();
        let (mut rx, handle) =
            WsSubscriber::new(format!("ws://{addr}"), spec(), fast_config()).spawn(shutdown);
        assert_eq!(rx.recv().await.unwrap(), "ok");
        trigger.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn call_once_returns_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(sock).await.unwrap();
            let req: Value = serde_json::from_str(&text_of(ws.next().await.unwrap().unwrap())).unwrap();
            assert_eq!(req["method"], "chain_getHeader");
            ws.send(Message::Text(r#"{"jsonrpc":"2.0","id":1,"result":{"number":"0x2a"}}"#.into()))
                .await
                .unwrap();
            while ws.next().await.is_some() {}
        });
        let header = call_once(
            &format!("ws://{addr}"),
            "chain_getHeader",
            vec![],
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(header["number"], "0x2a");
    }

    #[tokio::test]
    async fn connection_check_fails_without_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let subscriber = WsSubscriber::new(format!("ws://{addr}"), spec(), fast_config());
        assert!(subscriber.check_connection().await.is_err());
    }
}
