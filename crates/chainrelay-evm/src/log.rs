//! EVM log wire format.

use serde::Deserialize;
use serde_json::Value;

use chainrelay_core::adapter::LogEvent;
use chainrelay_core::error::{AdapterError, TransportError};
use chainrelay_core::range::{parse_position, RangeKind};

use crate::flavor::EvmFlavor;

/// A log as returned by `*_getLogs` or pushed on a logs subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EvmLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    #[serde(rename = "epochNumber", default)]
    pub epoch_number: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl EvmLog {
    /// Returns `true` if this log was dropped by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Block or epoch number, depending on what the chain counts.
    pub fn position(&self, kind: RangeKind) -> Option<u64> {
        let raw = match kind {
            RangeKind::Block => self.block_number.as_deref(),
            RangeKind::Epoch => self.epoch_number.as_deref(),
        }?;
        parse_position(raw)
    }

    pub fn into_event(self, kind: RangeKind) -> Result<LogEvent, AdapterError> {
        let position = self.position(kind);
        let hex_data = self.data.strip_prefix("0x").unwrap_or(&self.data);
        let data = hex::decode(hex_data)
            .map_err(|e| AdapterError::Protocol(format!("log data is not hex: {e}")))?;
        Ok(LogEvent {
            address: self.address,
            topics: self.topics,
            data,
            position,
        })
    }
}

/// Turn one pushed notification into a log event.
///
/// `Ok(None)` means the notification carries nothing to relay: a removed
/// log, or a Conflux revert notice.
pub fn parse_notification(flavor: EvmFlavor, raw: Value) -> Result<Option<LogEvent>, AdapterError> {
    if flavor.has_revert_notices() && raw.get("revertTo").is_some() {
        tracing::debug!(chain = %flavor.chain(), "dropping revert notice");
        return Ok(None);
    }
    let mut log: EvmLog = serde_json::from_value(raw).map_err(TransportError::from)?;
    log.address = flavor.normalize_address(&log.address);
    if log.is_removed() {
        tracing::debug!(chain = %flavor.chain(), address = %log.address, "skipping removed log");
        return Ok(None);
    }
    log.into_event(flavor.range_kind()).map(Some)
}

/// Parse a `*_getLogs` result.
///
/// Fails only if the result is not a list. Entries that do not parse are
/// logged and dropped so the rest of the batch is still relayed.
pub fn parse_logs(flavor: EvmFlavor, result: Value) -> Result<Vec<EvmLog>, AdapterError> {
    let Value::Array(entries) = result else {
        return Err(AdapterError::Protocol(format!(
            "{} result is not a list",
            flavor.methods().get_logs
        )));
    };
    let mut logs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<EvmLog>(entry) {
            Ok(mut log) => {
                log.address = flavor.normalize_address(&log.address);
                logs.push(log);
            }
            Err(e) => tracing::warn!(chain = %flavor.chain(), index, error = %e, "skipping malformed log entry"),
        }
    }
    Ok(logs)
}
