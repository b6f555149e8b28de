//! `SubstrateAdapter`: push subscription to `System.Events`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainrelay_core::adapter::{
    emit, AdapterState, EventSink, ProtocolAdapter, RawChainEvent, Shutdown, StructuredRequest,
};
use chainrelay_core::error::{AdapterError, ConfigError};
use chainrelay_core::jobid::matches_job_id;
use chainrelay_core::metrics::SourcePing;
use chainrelay_ws::{call_once, SubscribeSpec, WsConfig, WsSubscriber};

use crate::request::OracleRequest;
use crate::scale::{decode_event_records, EventRegistry};
use crate::storage::{StorageChangeSet, SYSTEM_EVENTS_KEY};

/// Runtime-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateConfig {
    /// Index of the Chainlink pallet in the target runtime.
    #[serde(default = "default_chainlink_pallet")]
    pub chainlink_pallet: u8,
}

fn default_chainlink_pallet() -> u8 {
    6
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            chainlink_pallet: default_chainlink_pallet(),
        }
    }
}

pub struct SubstrateAdapter {
    name: String,
    url: String,
    job_id: String,
    accounts: Vec<[u8; 32]>,
    registry: EventRegistry,
    ws: WsConfig,
    ping: SourcePing,
}

impl SubstrateAdapter {
    pub fn new(
        url: &str,
        job_id: &str,
        account_ids: &[String],
        config: &SubstrateConfig,
        ws: WsConfig,
    ) -> Result<Self, AdapterError> {
        let accounts = account_ids
            .iter()
            .map(|id| parse_account_id(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: "substrate/push".to_string(),
            url: url.to_string(),
            job_id: job_id.to_string(),
            accounts,
            registry: EventRegistry::runlog(config.chainlink_pallet),
            ws,
            ping: SourcePing::detached(),
        })
    }

    fn subscriber(&self) -> WsSubscriber {
        let spec = SubscribeSpec {
            method: "state_subscribeStorage".to_string(),
            params: vec![json!([SYSTEM_EVENTS_KEY])],
            unsubscribe_method: "state_unsubscribeStorage".to_string(),
        };
        WsSubscriber::new(&self.url, spec, self.ws.clone())
    }

    /// Requests for this job and these oracles carried by one notification.
    fn requests_in(&self, raw: Value) -> Vec<StructuredRequest> {
        let changes: StorageChangeSet = match serde_json::from_value(raw) {
            Ok(changes) => changes,
            Err(e) => {
                tracing::warn!(adapter = %self.name, error = %e, "unreadable storage notification");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for value in changes.values_for(SYSTEM_EVENTS_KEY) {
            let records = match decode_event_records(&self.registry, &value) {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(adapter = %self.name, block = %changes.block, error = %e, "failed to decode event records");
                    continue;
                }
            };
            for request in records.iter().filter_map(OracleRequest::from_record) {
                if !matches_job_id(&self.job_id, &request.spec_index) {
                    tracing::debug!(expected = %self.job_id, requested = %request.spec_index, "request for another job");
                    continue;
                }
                if !self.accounts.contains(&request.oracle) {
                    tracing::debug!(oracle = %hex::encode(request.oracle), "request for another oracle");
                    continue;
                }
                out.push(StructuredRequest {
                    job_id: request.spec_index.clone(),
                    fields: request.into_canonical(),
                });
            }
        }
        out
    }
}

fn parse_account_id(id: &str) -> Result<[u8; 32], ConfigError> {
    let invalid = || ConfigError::InvalidParameter {
        field: "accountIds",
        value: id.to_string(),
    };
    let bytes = hex::decode(id.strip_prefix("0x").unwrap_or(id)).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

#[async_trait]
impl ProtocolAdapter for SubstrateAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_source_ping(&mut self, ping: SourcePing) {
        self.ping = ping;
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        call_once(&self.url, "chain_getHeader", vec![], self.ws.handshake_timeout).await?;
        Ok(())
    }

    async fn run(&mut self, sink: EventSink, mut shutdown: Shutdown) -> Result<(), AdapterError> {
        let (mut notifications, handle) = self.subscriber().spawn(shutdown.clone());
        tracing::info!(adapter = %self.name, job_id = %self.job_id, state = %AdapterState::Connecting, "substrate adapter started");

        'outer: while let Some(raw) = notifications.recv().await {
            self.ping.touch();
            for request in self.requests_in(raw) {
                if !emit(&sink, RawChainEvent::Request(request), &mut shutdown).await {
                    break 'outer;
                }
            }
        }

        if !shutdown.is_triggered() {
            handle.abort();
        }
        let _ = handle.await;
        tracing::info!(adapter = %self.name, state = %AdapterState::Closed, "substrate adapter stopped");
        Ok(())
    }
}
