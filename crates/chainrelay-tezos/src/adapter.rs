//! `TezosAdapter`: follow new heads and relay oracle requests from their
//! manager operations.
//!
//! ```text
//! /monitor/heads/main ──▶ head hash ──▶ block operations (pass 3)
//!                                          │
//!                 successful create_request / on_token_transfer calls
//!                         to a watched oracle contract
//!                                          │
//!            oracle storage type ──▶ %requests big_map diff ──▶ request
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;

use chainrelay_core::adapter::{
    emit, AdapterState, EventSink, ProtocolAdapter, RawChainEvent, Shutdown, StructuredRequest,
};
use chainrelay_core::error::{AdapterError, TransportError};
use chainrelay_core::jobid::matches_job_id;
use chainrelay_core::metrics::SourcePing;
use chainrelay_core::CanonicalRequest;

use crate::michelson::{
    extract_values, request_value_type, requests_big_map_id, variant_value, Expr, MichelsonError,
};
use crate::operations::{
    manager_operations, request_diff, storage_type_and_value, successful_request_calls, HeadLine,
    InternalOperation,
};
use crate::rpc::{HeadLines, TezosRpc};

const FIELD_ID: &str = "id";
const FIELD_JOB_ID: &str = "jobId";
const FIELD_ORACLE_ADDRESS: &str = "oracleAddress";
const FIELD_PARAMETERS: &str = "parameters";

/// Pause between monitor reconnects.
pub const MONITOR_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TezosError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Michelson(#[from] MichelsonError),

    #[error("invalid block operations: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no big_map_diff for big_map {0}")]
    MissingRequestDiff(String),

    #[error("request has no string {0} field")]
    MissingField(&'static str),
}

impl From<TezosError> for AdapterError {
    fn from(e: TezosError) -> Self {
        match e {
            TezosError::Transport(t) => AdapterError::Transport(t),
            other => AdapterError::Protocol(other.to_string()),
        }
    }
}

pub struct TezosAdapter {
    name: String,
    job_id: String,
    addresses: Vec<String>,
    rpc: Arc<dyn TezosRpc>,
    retry_interval: Duration,
    ping: SourcePing,
}

/// Why a monitor session ended.
enum SessionEnd {
    Shutdown,
    Lost,
}

impl TezosAdapter {
    pub fn new(rpc: Arc<dyn TezosRpc>, job_id: &str, addresses: Vec<String>) -> Self {
        Self {
            name: "tezos/monitor".to_string(),
            job_id: job_id.to_string(),
            addresses,
            rpc,
            retry_interval: MONITOR_RETRY_INTERVAL,
            ping: SourcePing::detached(),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Requests for this job found in the block `block_hash`.
    ///
    /// A call whose request cannot be resolved is logged and skipped; the
    /// other calls in the block are still relayed.
    pub async fn process_head(&self, block_hash: &str) -> Result<Vec<StructuredRequest>, TezosError> {
        let raw = self.rpc.block_operations(block_hash).await?;
        let mut out = Vec::new();

        for operation in manager_operations(&raw)? {
            for content in &operation.contents {
                for call in successful_request_calls(content, &self.addresses) {
                    match self.request_from_call(call).await {
                        Ok(Some(request)) => {
                            tracing::info!(
                                adapter = %self.name,
                                block = %block_hash,
                                operation = %operation.hash,
                                oracle = %call.destination,
                                "oracle request found"
                            );
                            out.push(request);
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(
                            adapter = %self.name,
                            block = %block_hash,
                            operation = %operation.hash,
                            oracle = %call.destination,
                            error = %e,
                            "skipping unreadable request"
                        ),
                    }
                }
            }
        }
        Ok(out)
    }

    /// The request one oracle call stored, if it belongs to this job.
    async fn request_from_call(&self, call: &InternalOperation) -> Result<Option<StructuredRequest>, TezosError> {
        let script = self.rpc.contract_script(&call.destination).await?;
        let (storage_ty, storage) = storage_type_and_value(&script)?;
        let big_map_id = requests_big_map_id(&storage_ty, &storage)?;
        let diff = request_diff(&big_map_id, &call.result.big_map_diff)
            .ok_or_else(|| TezosError::MissingRequestDiff(big_map_id.clone()))?;

        let values = extract_values(&request_value_type(&storage_ty)?, &diff.value)?;
        let job_id = values
            .get(FIELD_JOB_ID)
            .and_then(Value::as_str)
            .ok_or(TezosError::MissingField(FIELD_JOB_ID))?
            .to_string();
        if !matches_job_id(&self.job_id, &job_id) {
            tracing::debug!(expected = %self.job_id, requested = %job_id, "request for another job");
            return Ok(None);
        }
        let request_id = variant_value(&Expr::parse(&diff.key)?)?;

        let mut fields = CanonicalRequest::new();
        fields.insert(
            FIELD_PARAMETERS,
            values.get(FIELD_PARAMETERS).cloned().unwrap_or(Value::Null),
        );
        fields.insert(FIELD_JOB_ID, job_id.clone());
        fields.insert(FIELD_ORACLE_ADDRESS, call.destination.clone());
        fields.insert(FIELD_ID, request_id);
        Ok(Some(StructuredRequest { job_id, fields }))
    }

    async fn follow(&self, mut lines: HeadLines, sink: &EventSink, shutdown: &mut Shutdown) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.triggered() => return SessionEnd::Shutdown,
                next = lines.next() => next,
            };
            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!(adapter = %self.name, error = %e, "monitor stream failed");
                    return SessionEnd::Lost;
                }
                None => return SessionEnd::Lost,
            };
            self.ping.touch();

            let head: HeadLine = match serde_json::from_str(&line) {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(adapter = %self.name, error = %e, "unreadable head");
                    continue;
                }
            };
            if head.hash.is_empty() {
                tracing::warn!(adapter = %self.name, "head without hash");
                continue;
            }
            tracing::debug!(adapter = %self.name, block = %head.hash, level = ?head.level, "new head");

            let processed = tokio::select! {
                biased;
                _ = shutdown.triggered() => return SessionEnd::Shutdown,
                res = self.process_head(&head.hash) => res,
            };
            let requests = match processed {
                Ok(requests) => requests,
                Err(e) => {
                    tracing::error!(adapter = %self.name, block = %head.hash, error = %e, "failed to process head");
                    continue;
                }
            };
            for request in requests {
                if !emit(sink, RawChainEvent::Request(request), shutdown).await {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for TezosAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_source_ping(&mut self, ping: SourcePing) {
        self.ping = ping;
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        drop(self.rpc.monitor_heads().await?);
        Ok(())
    }

    async fn run(&mut self, sink: EventSink, mut shutdown: Shutdown) -> Result<(), AdapterError> {
        tracing::info!(adapter = %self.name, job_id = %self.job_id, url = %self.rpc.url(), "tezos adapter started");

        loop {
            let opened = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                res = self.rpc.monitor_heads() => res,
            };
            match opened {
                Ok(lines) => {
                    tracing::info!(adapter = %self.name, state = %AdapterState::Subscribed, "monitoring heads");
                    if let SessionEnd::Shutdown = self.follow(lines, &sink, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => tracing::warn!(adapter = %self.name, error = %e, "failed to open head monitor"),
            }

            tracing::warn!(
                adapter = %self.name,
                retry_in_ms = self.retry_interval.as_millis() as u64,
                "lost connection to Tezos RPC node, retrying"
            );
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        tracing::info!(adapter = %self.name, state = %AdapterState::Closed, "tezos adapter stopped");
        Ok(())
    }
}
