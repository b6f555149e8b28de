//! The chain-agnostic request handed to the trigger API.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key naming the emitting contract.
pub const ADDRESS_KEY: &str = "address";
/// Key carrying the hex-encoded fixed header of a runlog payload.
pub const DATA_PREFIX_KEY: &str = "dataPrefix";
/// Key carrying the callback selector.
pub const FUNCTION_SELECTOR_KEY: &str = "functionSelector";

/// An ordered, flat key → value request.
///
/// Keys keep insertion order so that the serialized body is stable for a
/// given input. Values are JSON scalars, or nested values for chains whose
/// requests carry structured parameters (Tezos maps).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRequest(IndexMap<String, Value>);

impl CanonicalRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a value as a string slice, if it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Insert a field, replacing any previous value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merge synthesized fields. On collision the synthesized value wins.
    pub fn merge_synthesized<K, V, I>(&mut self, fields: I)
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in fields {
            self.0.insert(k.into(), v.into());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Serialize as the flat JSON object sent to the trigger API.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }
}

impl From<IndexMap<String, Value>> for CanonicalRequest {
    fn from(map: IndexMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for CanonicalRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthesized_fields_win() {
        let mut req: CanonicalRequest =
            [("get", json!("https://x")), ("address", json!("spoofed"))]
                .into_iter()
                .collect();
        req.merge_synthesized([("address", json!("0xabc"))]);
        assert_eq!(req.get_str("address"), Some("0xabc"));
        assert_eq!(req.len(), 2);
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut req = CanonicalRequest::new();
        req.insert("path", "USD");
        req.insert("address", "0x1");
        req.insert("dataPrefix", "0x00");
        let body = String::from_utf8(req.to_json_bytes().unwrap()).unwrap();
        assert_eq!(body, r#"{"path":"USD","address":"0x1","dataPrefix":"0x00"}"#);
    }
}
