//! `OntologyAdapter`: scan every block height for oracle requests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{self, MissedTickBehavior};

use chainrelay_core::adapter::{
    emit, AdapterState, EventSink, ProtocolAdapter, RawChainEvent, Shutdown,
};
use chainrelay_core::error::{AdapterError, TransportError};
use chainrelay_core::metrics::SourcePing;
use chainrelay_core::RpcTransport;

use crate::notify::{block_events, oracle_request};

/// Pause between scan cycles.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub struct OntologyAdapter {
    name: String,
    job_id: String,
    addresses: HashSet<String>,
    transport: Arc<dyn RpcTransport>,
    interval: Duration,
    /// First height not yet fully scanned.
    next_height: Option<u64>,
    ping: SourcePing,
}

impl OntologyAdapter {
    pub fn new(transport: Arc<dyn RpcTransport>, job_id: &str, addresses: Vec<String>) -> Self {
        Self {
            name: "ontology/scan".to_string(),
            job_id: job_id.to_string(),
            addresses: addresses.into_iter().collect(),
            transport,
            interval: SCAN_INTERVAL,
            next_height: None,
            ping: SourcePing::detached(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn next_height(&self) -> Option<u64> {
        self.next_height
    }

    /// Height of the latest block (`getblockcount - 1`).
    async fn current_height(&self) -> Result<u64, TransportError> {
        let count = self.transport.call("getblockcount", vec![]).await?;
        count
            .as_u64()
            .map(|c| c.saturating_sub(1))
            .ok_or_else(|| TransportError::UnexpectedResponse(format!("block count {count}")))
    }

    /// Scan all unseen heights up to the tip.
    ///
    /// Returns `false` when the adapter should stop. A failed height ends
    /// the cycle; it is retried on the next one.
    async fn scan(&mut self, sink: &EventSink, shutdown: &mut Shutdown) -> bool {
        let tip = match self.current_height().await {
            Ok(tip) => {
                self.ping.touch();
                tip
            }
            Err(e) => {
                tracing::error!(adapter = %self.name, error = %e, "failed to read block height");
                return true;
            }
        };
        let start = *self.next_height.get_or_insert(tip);

        for height in start..=tip {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.triggered() => return false,
                res = self.transport.call("getsmartcodeevent", vec![json!(height)]) => res,
            };
            let events = match fetched {
                Ok(raw) => match block_events(raw) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::error!(adapter = %self.name, height, error = %e, "invalid block events");
                        return true;
                    }
                },
                Err(e) => {
                    tracing::error!(adapter = %self.name, height, error = %e, "failed to read block events");
                    return true;
                }
            };
            tracing::debug!(adapter = %self.name, height, events = events.len(), "scanned block");

            for event in &events {
                for notify in &event.notify {
                    let request = match oracle_request(notify, &self.addresses, &self.job_id) {
                        Ok(Some(request)) => request,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::error!(adapter = %self.name, tx = %event.tx_hash, error = %e, "unreadable oracle request");
                            continue;
                        }
                    };
                    tracing::info!(adapter = %self.name, height, tx = %event.tx_hash, "oracle request found");
                    if !emit(sink, RawChainEvent::Request(request), shutdown).await {
                        return false;
                    }
                }
            }
            self.next_height = Some(height + 1);
        }
        true
    }
}

#[async_trait]
impl ProtocolAdapter for OntologyAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_source_ping(&mut self, ping: SourcePing) {
        self.ping = ping;
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        self.current_height().await?;
        Ok(())
    }

    async fn run(&mut self, sink: EventSink, mut shutdown: Shutdown) -> Result<(), AdapterError> {
        let addresses: Vec<&String> = self.addresses.iter().collect();
        tracing::info!(
            adapter = %self.name,
            url = %self.transport.url(),
            ?addresses,
            state = %AdapterState::Polling,
            "ontology adapter started"
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {}
            }
            if !self.scan(&sink, &mut shutdown).await {
                break;
            }
        }

        tracing::info!(adapter = %self.name, state = %AdapterState::Closed, "ontology adapter stopped");
        Ok(())
    }
}
