//! Log filter queries for EVM-family nodes.
//!
//! A `FilterQuery` owns its `RangeTracker`; the adapter that owns the query is
//! the only writer. Building the wire argument never mutates the cursor.

use serde_json::{Map, Value};

use crate::error::FilterError;
use crate::jobid::job_id_topic;
use crate::range::{RangeKind, RangeTracker};

/// Topic of the `OracleRequest` runlog event (non-indexed layout).
pub const ORACLE_REQUEST_TOPIC: &str =
    "0xd8d7ecc4800d25fa53ce0372f13a416d98907a7ef3d8d3bdd79cf4fe75529c65";

/// Which request shape a query is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Historical scan: an unset lower bound means "from genesis".
    Scan,
    /// Live tip query: an unset lower bound means "latest".
    Tip,
}

/// Contract/topic/range filter for `*_getLogs` and `*_subscribe("logs")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterQuery {
    pub addresses: Vec<String>,
    /// Topic matchers by position; an empty inner list matches anything.
    pub topics: Vec<Vec<String>>,
    /// Restrict to a single block. Mutually exclusive with the range bounds.
    pub block_hash: Option<String>,
    /// Upper bound; empty means the chain's "latest" tag.
    pub to: String,
    range: RangeTracker,
}

impl FilterQuery {
    pub fn new(kind: RangeKind, addresses: Vec<String>, topics: Vec<Vec<String>>) -> Self {
        Self {
            addresses,
            topics,
            block_hash: None,
            to: String::new(),
            range: RangeTracker::new(kind),
        }
    }

    /// Runlog filter for one job: `[[OracleRequest], [bytes32(job_id)]]`.
    pub fn runlog(kind: RangeKind, job_id: &str, addresses: Vec<String>) -> Self {
        Self::new(
            kind,
            addresses,
            vec![
                vec![ORACLE_REQUEST_TOPIC.to_string()],
                vec![job_id_topic(job_id)],
            ],
        )
    }

    pub fn kind(&self) -> RangeKind {
        self.range.kind()
    }

    pub fn range(&self) -> &RangeTracker {
        &self.range
    }

    pub fn range_mut(&mut self) -> &mut RangeTracker {
        &mut self.range
    }

    /// Build the JSON object sent as the filter parameter.
    ///
    /// Fails with `ConflictingFilter` if a block hash is combined with either
    /// range bound; nothing is produced in that case.
    pub fn to_query_arg(&self, mode: QueryMode) -> Result<Value, FilterError> {
        let kind = self.range.kind();
        let from = self.range.from_range();

        let mut arg = Map::new();
        arg.insert(
            "address".into(),
            Value::Array(self.addresses.iter().cloned().map(Value::String).collect()),
        );
        arg.insert(
            "topics".into(),
            Value::Array(
                self.topics
                    .iter()
                    .map(|alts| Value::Array(alts.iter().cloned().map(Value::String).collect()))
                    .collect(),
            ),
        );

        if let Some(hash) = &self.block_hash {
            if !from.is_empty() || !self.to.is_empty() {
                return Err(FilterError::ConflictingFilter {
                    hash_key: "blockHash",
                    from_key: kind.from_key(),
                    to_key: kind.to_key(),
                });
            }
            arg.insert("blockHash".into(), Value::String(hash.clone()));
            return Ok(Value::Object(arg));
        }

        let from = if from.is_empty() {
            match mode {
                QueryMode::Scan => kind.genesis(),
                QueryMode::Tip => kind.latest(),
            }
        } else {
            from
        };
        let to = if self.to.is_empty() {
            kind.latest()
        } else {
            self.to.as_str()
        };
        arg.insert(kind.from_key().into(), Value::String(from.to_string()));
        arg.insert(kind.to_key().into(), Value::String(to.to_string()));
        Ok(Value::Object(arg))
    }
}
