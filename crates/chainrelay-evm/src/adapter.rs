//! `EvmAdapter`: runlog events from any EVM-family chain.
//!
//! ```text
//! push:  ws ──▶ *_subscribe["logs", filter] ──▶ notification ──▶ LogEvent
//! poll:  every refresh interval ──▶ *_getLogs[filter(from = cursor)] ──▶ LogEvent*
//!                                        ▲                                │
//!                                        └──── RangeTracker.observe ◀─────┘
//! ```
//!
//! Job filtering happens in the node filter (`topics[1]`) and again in the
//! subscription manager. This adapter only turns node output into
//! [`RawChainEvent::Log`] values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{self, MissedTickBehavior};

use chainrelay_core::adapter::{emit, AdapterState, EventSink, ProtocolAdapter, RawChainEvent, Shutdown};
use chainrelay_core::error::AdapterError;
use chainrelay_core::filter::{FilterQuery, QueryMode};
use chainrelay_core::metrics::SourcePing;
use chainrelay_core::transport::RpcTransport;
use chainrelay_ws::{SubscribeSpec, WsConfig, WsSubscriber};

use crate::flavor::EvmFlavor;
use crate::log::{parse_logs, parse_notification, EvmLog};

enum Mode {
    Push {
        subscriber: WsSubscriber,
    },
    Poll {
        transport: Arc<dyn RpcTransport>,
        query: FilterQuery,
        interval: Duration,
    },
}

/// Protocol adapter for one EVM-family subscription.
pub struct EvmAdapter {
    name: String,
    flavor: EvmFlavor,
    mode: Mode,
    ping: SourcePing,
}

impl EvmAdapter {
    /// Push adapter over a WebSocket endpoint.
    pub fn push(
        flavor: EvmFlavor,
        url: &str,
        job_id: &str,
        addresses: Vec<String>,
        ws: WsConfig,
    ) -> Result<Self, AdapterError> {
        let addresses = addresses.iter().map(|a| flavor.normalize_address(a)).collect();
        let filter = FilterQuery::runlog(flavor.range_kind(), job_id, addresses)
            .to_query_arg(QueryMode::Scan)?;
        let methods = flavor.methods();
        let spec = SubscribeSpec {
            method: methods.subscribe.to_string(),
            params: vec![json!("logs"), filter],
            unsubscribe_method: methods.unsubscribe.to_string(),
        };
        Ok(Self {
            name: format!("{}/push", flavor.chain()),
            flavor,
            mode: Mode::Push {
                subscriber: WsSubscriber::new(url, spec, ws),
            },
            ping: SourcePing::detached(),
        })
    }

    /// Poll adapter over a request/response transport.
    pub fn poll(
        flavor: EvmFlavor,
        transport: Arc<dyn RpcTransport>,
        job_id: &str,
        addresses: Vec<String>,
        interval: Duration,
    ) -> Self {
        let addresses = addresses.iter().map(|a| flavor.normalize_address(a)).collect();
        let mut query = FilterQuery::runlog(flavor.range_kind(), job_id, addresses);
        query.range_mut().ensure_started();
        Self {
            name: format!("{}/poll", flavor.chain()),
            flavor,
            mode: Mode::Poll {
                transport,
                query,
                interval,
            },
            ping: SourcePing::detached(),
        }
    }

    pub fn flavor(&self) -> EvmFlavor {
        self.flavor
    }

    /// Current poll cursor; `None` in push mode.
    pub fn cursor(&self) -> Option<&str> {
        match &self.mode {
            Mode::Poll { query, .. } => Some(query.range().from_range()),
            Mode::Push { .. } => None,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for EvmAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_source_ping(&mut self, ping: SourcePing) {
        self.ping = ping;
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        match &mut self.mode {
            Mode::Push { subscriber } => Ok(subscriber.check_connection().await?),
            Mode::Poll {
                transport, query, ..
            } => {
                let head = transport.call(self.flavor.methods().head, vec![]).await?;
                let Value::String(head) = head else {
                    return Err(AdapterError::Protocol(format!(
                        "{} returned {head}",
                        self.flavor.methods().head
                    )));
                };
                tracing::debug!(adapter = %self.name, head = %head, "seeding range cursor");
                query.range_mut().seed(head);
                Ok(())
            }
        }
    }

    async fn run(&mut self, sink: EventSink, shutdown: Shutdown) -> Result<(), AdapterError> {
        let flavor = self.flavor;
        match &mut self.mode {
            Mode::Push { subscriber } => {
                run_push(&self.name, flavor, subscriber.clone(), &self.ping, sink, shutdown).await
            }
            Mode::Poll {
                transport,
                query,
                interval,
            } => {
                run_poll(
                    &self.name,
                    flavor,
                    transport.as_ref(),
                    query,
                    *interval,
                    &self.ping,
                    sink,
                    shutdown,
                )
                .await
            }
        }
    }
}

async fn run_push(
    name: &str,
    flavor: EvmFlavor,
    subscriber: WsSubscriber,
    ping: &SourcePing,
    sink: EventSink,
    mut shutdown: Shutdown,
) -> Result<(), AdapterError> {
    let (mut notifications, handle) = subscriber.spawn(shutdown.clone());
    tracing::info!(adapter = %name, state = %AdapterState::Connecting, "push adapter started");

    while let Some(raw) = notifications.recv().await {
        ping.touch();
        match parse_notification(flavor, raw) {
            Ok(Some(event)) => {
                if !emit(&sink, RawChainEvent::Log(event), &mut shutdown).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(adapter = %name, error = %e, "skipping unreadable log"),
        }
    }

    if !shutdown.is_triggered() {
        handle.abort();
    }
    let _ = handle.await;
    tracing::info!(adapter = %name, state = %AdapterState::Closed, "push adapter stopped");
    Ok(())
}

async fn run_poll(
    name: &str,
    flavor: EvmFlavor,
    transport: &dyn RpcTransport,
    query: &mut FilterQuery,
    interval: Duration,
    ping: &SourcePing,
    sink: EventSink,
    mut shutdown: Shutdown,
) -> Result<(), AdapterError> {
    let kind = flavor.range_kind();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        adapter = %name,
        state = %AdapterState::Polling,
        interval_ms = interval.as_millis() as u64,
        "poll adapter started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            res = fetch_logs(transport, flavor, query) => res,
        };
        let logs = match fetched {
            Ok(logs) => {
                ping.touch();
                logs
            }
            Err(e) => {
                tracing::warn!(adapter = %name, from = %query.range().from_range(), error = %e, "log poll failed");
                continue;
            }
        };

        for log in logs {
            if log.is_removed() {
                tracing::debug!(adapter = %name, address = %log.address, "skipping removed log");
                continue;
            }
            let event = match log.into_event(kind) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(adapter = %name, error = %e, "skipping unreadable log");
                    continue;
                }
            };
            if let Some(position) = event.position {
                query.range_mut().observe(position);
            }
            if !emit(&sink, RawChainEvent::Log(event), &mut shutdown).await {
                return Ok(());
            }
        }
    }

    tracing::info!(adapter = %name, state = %AdapterState::Closed, "poll adapter stopped");
    Ok(())
}

async fn fetch_logs(
    transport: &dyn RpcTransport,
    flavor: EvmFlavor,
    query: &FilterQuery,
) -> Result<Vec<EvmLog>, AdapterError> {
    let arg = query.to_query_arg(QueryMode::Tip)?;
    let result = transport.call(flavor.methods().get_logs, vec![arg]).await?;
    parse_logs(flavor, result)
}
