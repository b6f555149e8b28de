//! `Chainlink.OracleRequest` events and their relayed form.

use chainrelay_core::canonical::CanonicalRequest;

use crate::scale::{EventRecord, FieldValue};

/// A decoded `Chainlink.OracleRequest` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub oracle: [u8; 32],
    pub spec_index: String,
    pub request_id: u64,
    pub bytes: Vec<String>,
    pub callback: String,
    pub payment: u128,
}

impl OracleRequest {
    /// `None` unless `record` is a well-formed `Chainlink.OracleRequest`.
    pub fn from_record(record: &EventRecord) -> Option<Self> {
        if !record.is("Chainlink", "OracleRequest") {
            return None;
        }
        let FieldValue::AccountId(oracle) = record.field("oracle")? else {
            return None;
        };
        let FieldValue::Bytes(spec_index) = record.field("spec_index")? else {
            return None;
        };
        let FieldValue::U64(request_id) = record.field("request_id")? else {
            return None;
        };
        let FieldValue::VecBytes(bytes) = record.field("bytes")? else {
            return None;
        };
        let FieldValue::Bytes(callback) = record.field("callback")? else {
            return None;
        };
        let FieldValue::U128(payment) = record.field("payment")? else {
            return None;
        };
        Some(Self {
            oracle: *oracle,
            spec_index: String::from_utf8_lossy(spec_index).into_owned(),
            request_id: *request_id,
            bytes: bytes
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect(),
            callback: String::from_utf8_lossy(callback).into_owned(),
            payment: *payment,
        })
    }

    pub fn into_canonical(self) -> CanonicalRequest {
        let mut request = string_pairs_to_kv(&self.bytes);
        request.insert("payment", self.payment.to_string());
        request.insert("request_id", self.request_id.to_string());
        request.insert("function", self.callback);
        request.insert("request_type", "runlog");
        request
    }
}

/// `["k1", "v1", "k2", "v2"]` → `{k1: v1, k2: v2}`.
///
/// Empty strings are skipped. Even positions are keys; an odd-position
/// value is only used while a key is pending.
pub fn string_pairs_to_kv(items: &[String]) -> CanonicalRequest {
    let mut out = CanonicalRequest::new();
    let mut key: Option<&str> = None;
    for (i, item) in items.iter().enumerate() {
        if item.is_empty() {
            continue;
        }
        if i % 2 == 0 {
            key = Some(item.as_str());
        } else if let Some(k) = key.take() {
            out.insert(k, item.clone());
        }
    }
    out
}
