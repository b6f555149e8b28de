//! Smart contract notifications and the `oracleRequest` layout.
//!
//! ```text
//! States[0]  hex("oracleRequest")     States[5]  callback address
//! States[1]  job id                   States[6]  callback function
//! States[2]  (requester)              States[7]  expiration
//! States[3]  request id               States[8]  (version)
//! States[4]  payment                  States[9]  CBOR parameters, hex
//! ```

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use chainrelay_codec::parse_cbor_map;
use chainrelay_core::canonical::ADDRESS_KEY;
use chainrelay_core::error::DecodeError;
use chainrelay_core::jobid::matches_job_id;
use chainrelay_core::{CanonicalRequest, StructuredRequest};

/// `hex("oracleRequest")`.
pub const ORACLE_REQUEST_NAME: &str = "6f7261636c6552657175657374";

const MIN_STATES: usize = 11;

/// One entry of a `getsmartcodeevent` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractEvent {
    #[serde(rename = "TxHash", default)]
    pub tx_hash: String,
    #[serde(rename = "Notify", default)]
    pub notify: Vec<Notify>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Notify {
    #[serde(rename = "ContractAddress", default)]
    pub contract_address: String,
    #[serde(rename = "States", default)]
    pub states: Value,
}

/// Events of one block. Nodes answer `null` or `""` for empty blocks.
pub fn block_events(result: Value) -> Result<Vec<ContractEvent>, serde_json::Error> {
    match result {
        Value::Array(_) => serde_json::from_value(result),
        _ => Ok(Vec::new()),
    }
}

fn state(states: &[Value], index: usize) -> String {
    match &states[index] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The request carried by `notify`, if it is an `oracleRequest` from a
/// watched contract for `job_id`.
pub fn oracle_request(
    notify: &Notify,
    addresses: &HashSet<String>,
    job_id: &str,
) -> Result<Option<StructuredRequest>, DecodeError> {
    let Some(states) = notify.states.as_array() else {
        return Ok(None);
    };
    if !addresses.contains(&notify.contract_address) || states.len() < MIN_STATES {
        return Ok(None);
    }
    if state(states, 0) != ORACLE_REQUEST_NAME {
        return Ok(None);
    }
    let request_job = state(states, 1);
    if !matches_job_id(job_id, &request_job) {
        tracing::debug!(expected = %job_id, requested = %request_job, "request for another job");
        return Ok(None);
    }

    let data = hex::decode(state(states, 9))
        .map_err(|e| DecodeError::PayloadEncoding(format!("parameters are not hex: {e}")))?;
    let mut fields = CanonicalRequest::new();
    fields.merge_synthesized(parse_cbor_map(&data)?);
    fields.merge_synthesized([
        (ADDRESS_KEY, notify.contract_address.clone()),
        ("requestID", state(states, 3)),
        ("payment", state(states, 4)),
        ("callbackAddress", state(states, 5)),
        ("callbackFunction", state(states, 6)),
        ("expiration", state(states, 7)),
    ]);
    Ok(Some(StructuredRequest {
        job_id: request_job,
        fields,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) const ORACLE: &str = "AFmseVrdL9f9oyCzZefL9tG6UbvhPbdYzM";

    fn cbor_text(out: &mut Vec<u8>, s: &str) {
        assert!(s.len() < 24);
        out.push(0x60 + s.len() as u8);
        out.extend_from_slice(s.as_bytes());
    }

    /// `get: <url>, times: 100` without the map header.
    pub(crate) fn params(url: &str) -> String {
        let mut out = Vec::new();
        cbor_text(&mut out, "get");
        cbor_text(&mut out, url);
        cbor_text(&mut out, "times");
        out.extend_from_slice(&[0x18, 100]);
        hex::encode(out)
    }

    pub(crate) fn request_notify(contract: &str, job_id: &str, request_id: &str) -> Value {
        json!({
            "ContractAddress": contract,
            "States": [
                ORACLE_REQUEST_NAME,
                job_id,
                "requester",
                request_id,
                "0a",
                "callback",
                "fulfill",
                "1700000000",
                "01",
                params("https://a.io"),
                "extra"
            ]
        })
    }

    fn notify(raw: Value) -> Notify {
        serde_json::from_value(raw).unwrap()
    }

    fn watched() -> HashSet<String> {
        [ORACLE.to_string()].into_iter().collect()
    }

    #[test]
    fn name_is_hex_of_oracle_request() {
        assert_eq!(ORACLE_REQUEST_NAME, hex::encode("oracleRequest"));
    }

    #[test]
    fn maps_states_to_request() {
        let req = oracle_request(&notify(request_notify(ORACLE, "job-1", "r1")), &watched(), "job-1")
            .unwrap()
            .unwrap();
        assert_eq!(req.job_id, "job-1");
        let f = &req.fields;
        assert_eq!(f.get_str("get"), Some("https://a.io"));
        assert_eq!(f.get("times"), Some(&json!(100)));
        assert_eq!(f.get_str("address"), Some(ORACLE));
        assert_eq!(f.get_str("requestID"), Some("r1"));
        assert_eq!(f.get_str("payment"), Some("0a"));
        assert_eq!(f.get_str("callbackAddress"), Some("callback"));
        assert_eq!(f.get_str("callbackFunction"), Some("fulfill"));
        assert_eq!(f.get_str("expiration"), Some("1700000000"));
        assert_eq!(f.len(), 8);
    }

    #[test]
    fn non_requests_are_ignored() {
        let watched = watched();
        let mut short = request_notify(ORACLE, "job-1", "r1");
        short["States"].as_array_mut().unwrap().truncate(10);
        let mut renamed = request_notify(ORACLE, "job-1", "r1");
        renamed["States"][0] = json!("7472616e73666572");

        for raw in [
            request_notify("AOther", "job-1", "r1"),
            request_notify(ORACLE, "job-2", "r1"),
            short,
            renamed,
            json!({"ContractAddress": ORACLE, "States": "not a list"}),
        ] {
            assert_eq!(oracle_request(&notify(raw), &watched, "job-1").unwrap(), None);
        }
    }

    #[test]
    fn numeric_states_are_stringified() {
        let mut raw = request_notify(ORACLE, "job-1", "r1");
        raw["States"][7] = json!(1700000000);
        let req = oracle_request(&notify(raw), &watched(), "job-1").unwrap().unwrap();
        assert_eq!(req.fields.get_str("expiration"), Some("1700000000"));
    }

    #[test]
    fn bad_parameters_are_errors() {
        let mut raw = request_notify(ORACLE, "job-1", "r1");
        raw["States"][9] = json!("zz");
        assert!(oracle_request(&notify(raw), &watched(), "job-1").is_err());
    }

    #[test]
    fn empty_blocks() {
        assert!(block_events(json!(null)).unwrap().is_empty());
        assert!(block_events(json!("")).unwrap().is_empty());
        let events = block_events(json!([{"TxHash": "ab", "Notify": [request_notify(ORACLE, "j", "1")]}])).unwrap();
        assert_eq!(events[0].tx_hash, "ab");
        assert_eq!(events[0].notify.len(), 1);
    }
}
