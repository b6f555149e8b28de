//! `state_storage` notification payloads.

use serde::Deserialize;

/// `twox128("System") ++ twox128("Events")`.
pub const SYSTEM_EVENTS_KEY: &str =
    "0x26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7";

/// `{"block": "0x…", "changes": [["0xkey", "0xdata" | null], …]}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageChangeSet {
    pub block: String,
    #[serde(default)]
    pub changes: Vec<(String, Option<String>)>,
}

impl StorageChangeSet {
    /// Raw values written under `key`. Deleted entries (`null`) and values
    /// that are not hex are left out.
    pub fn values_for(&self, key: &str) -> Vec<Vec<u8>> {
        self.changes
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .filter_map(|(k, data)| {
                let data = data.as_deref()?;
                match hex::decode(data.strip_prefix("0x").unwrap_or(data)) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(key = %k, error = %e, "storage value is not hex");
                        None
                    }
                }
            })
            .collect()
    }
}
