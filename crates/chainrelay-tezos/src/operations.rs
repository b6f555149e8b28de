//! Block operations and contract scripts as returned by the Tezos node RPC.
//!
//! Only the fields the relay reads are modelled; everything else is ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::michelson::{Expr, MichelsonError};

/// Validation pass holding manager operations (transactions).
pub const MANAGER_PASS: usize = 3;

/// Entrypoints through which an oracle request can arrive.
pub const REQUEST_ENTRYPOINTS: [&str; 2] = ["create_request", "on_token_transfer"];

const APPLIED: &str = "applied";

/// One line of `/monitor/heads/main`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeadLine {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub level: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub operation_result: OperationResult,
    #[serde(default)]
    pub internal_operation_results: Vec<InternalOperation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InternalOperation {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub result: OperationResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub big_map_diff: Vec<BigMapDiff>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BigMapDiff {
    #[serde(default)]
    pub action: String,
    /// Big map id; nodes send it as a string, older ones as a number.
    #[serde(default)]
    pub big_map: Value,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

impl BigMapDiff {
    fn big_map_id(&self) -> String {
        match &self.big_map {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Manager operations from a `/chains/main/blocks/{hash}/operations` body.
pub fn manager_operations(block_operations: &Value) -> Result<Vec<Operation>, serde_json::Error> {
    match block_operations.get(MANAGER_PASS) {
        Some(pass) => Vec::<Operation>::deserialize(pass),
        None => Ok(Vec::new()),
    }
}

/// Internal calls in `content` that successfully reached one of `oracles`
/// through a request entrypoint.
pub fn successful_request_calls<'a>(content: &'a Content, oracles: &[String]) -> Vec<&'a InternalOperation> {
    if content.metadata.operation_result.status != APPLIED {
        return Vec::new();
    }
    content
        .metadata
        .internal_operation_results
        .iter()
        .filter(|op| REQUEST_ENTRYPOINTS.contains(&op.parameters.entrypoint.as_str()))
        .filter(|op| op.result.status == APPLIED)
        .filter(|op| oracles.iter().any(|a| *a == op.destination))
        .collect()
}

/// The `alloc`/`update` diff for `big_map_id`.
pub fn request_diff<'a>(big_map_id: &str, diffs: &'a [BigMapDiff]) -> Option<&'a BigMapDiff> {
    diffs
        .iter()
        .find(|d| d.big_map_id() == big_map_id && (d.action == "alloc" || d.action == "update"))
}

/// Storage type (`code[prim == "storage"].args[0]`) and value of a script.
pub fn storage_type_and_value(script: &Value) -> Result<(Expr, Value), MichelsonError> {
    let storage_section = script
        .get("code")
        .and_then(Value::as_array)
        .and_then(|code| {
            code.iter()
                .find(|section| section.get("prim").and_then(Value::as_str) == Some("storage"))
        })
        .and_then(|section| section.get("args"))
        .and_then(|args| args.get(0))
        .ok_or_else(|| MichelsonError::MissingAnnotation("storage".into()))?;
    let ty = Expr::parse(storage_section)?;
    let value = script.get("storage").cloned().unwrap_or(Value::Null);
    Ok((ty, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(outer: &str, entrypoint: &str, inner: &str, dest: &str) -> Content {
        serde_json::from_value(json!({
            "kind": "transaction",
            "metadata": {
                "operation_result": {"status": outer},
                "internal_operation_results": [{
                    "destination": dest,
                    "parameters": {"entrypoint": entrypoint, "value": {}},
                    "result": {"status": inner}
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn request_call_filter() {
        let oracles = vec!["KT1oracle".to_string()];
        let ok = content("applied", "on_token_transfer", "applied", "KT1oracle");
        assert_eq!(successful_request_calls(&ok, &oracles).len(), 1);
        let ok = content("applied", "create_request", "applied", "KT1oracle");
        assert_eq!(successful_request_calls(&ok, &oracles).len(), 1);

        for c in [
            content("failed", "create_request", "applied", "KT1oracle"),
            content("applied", "transfer", "applied", "KT1oracle"),
            content("applied", "create_request", "backtracked", "KT1oracle"),
            content("applied", "create_request", "applied", "KT1other"),
        ] {
            assert!(successful_request_calls(&c, &oracles).is_empty());
        }
    }

    #[test]
    fn manager_pass() {
        let ops = json!([[], [], [], [{"hash": "oo1", "contents": []}]]);
        let manager = manager_operations(&ops).unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager[0].hash, "oo1");
        assert!(manager_operations(&json!([[]])).unwrap().is_empty());
    }

    #[test]
    fn diff_lookup() {
        let diffs: Vec<BigMapDiff> = serde_json::from_value(json!([
            {"action": "remove", "big_map": "17"},
            {"action": "update", "big_map": "18"},
            {"action": "update", "big_map": 17, "key": {"int": "5"}}
        ]))
        .unwrap();
        let diff = request_diff("17", &diffs).unwrap();
        assert_eq!(diff.key["int"], "5");
        assert!(request_diff("19", &diffs).is_none());
    }

    #[test]
    fn storage_section() {
        let script = json!({
            "code": [
                {"prim": "parameter", "args": [{"prim": "unit"}]},
                {"prim": "storage", "args": [{"prim": "nat", "annots": ["%n"]}]},
                {"prim": "code", "args": [[]]}
            ],
            "storage": {"int": "1"}
        });
        let (ty, value) = storage_type_and_value(&script).unwrap();
        assert_eq!(ty.prim, "nat");
        assert_eq!(value["int"], "1");
        assert!(storage_type_and_value(&json!({"code": []})).is_err());
    }
}
