//! Forward-only cursor over block (or epoch) numbers.
//!
//! The tracker holds the next range position a poll query should start from.
//! It starts at a sentinel ("" or the chain's "latest" tag) and only moves
//! forward as events are observed:
//!
//! ```text
//! observe(P):  candidate = P + 1
//!              from = candidate   iff  from is a sentinel  OR  candidate > from
//! ```
//!
//! A late or out-of-order event can therefore never rewind the cursor.

use serde::{Deserialize, Serialize};

/// What the range cursor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    /// Block numbers (`fromBlock`/`toBlock`, sentinel `latest`).
    Block,
    /// Epoch numbers (`fromEpoch`/`toEpoch`, sentinels `latest_state`/`latest_mined`).
    Epoch,
}

impl RangeKind {
    pub fn from_key(&self) -> &'static str {
        match self {
            Self::Block => "fromBlock",
            Self::Epoch => "fromEpoch",
        }
    }

    pub fn to_key(&self) -> &'static str {
        match self {
            Self::Block => "toBlock",
            Self::Epoch => "toEpoch",
        }
    }

    /// Tag for the live tip of the chain.
    pub fn latest(&self) -> &'static str {
        match self {
            Self::Block => "latest",
            Self::Epoch => "latest_state",
        }
    }

    /// Tag for the start of the chain.
    pub fn genesis(&self) -> &'static str {
        "0x0"
    }

    /// Returns `true` if `value` is empty or one of this kind's tip tags.
    pub fn is_sentinel(&self, value: &str) -> bool {
        if value.is_empty() {
            return true;
        }
        match self {
            Self::Block => value == "latest",
            Self::Epoch => value == "latest_state" || value == "latest_mined",
        }
    }
}

/// Per-subscription range cursor. Owned by exactly one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTracker {
    kind: RangeKind,
    from: String,
}

impl RangeTracker {
    /// Unset cursor (push mode; the node tracks state).
    pub fn new(kind: RangeKind) -> Self {
        Self {
            kind,
            from: String::new(),
        }
    }

    /// Cursor starting at the chain tip (poll mode).
    pub fn starting_at_latest(kind: RangeKind) -> Self {
        Self {
            kind,
            from: kind.latest().to_string(),
        }
    }

    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    /// Current lower bound, exactly as it will be sent to the node.
    pub fn from_range(&self) -> &str {
        &self.from
    }

    pub fn is_unset(&self) -> bool {
        self.from.is_empty()
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind.is_sentinel(&self.from)
    }

    /// Replace the cursor with the node's current head (connection test).
    pub fn seed(&mut self, head: impl Into<String>) {
        self.from = head.into();
    }

    /// Replace an empty cursor with the tip tag.
    pub fn ensure_started(&mut self) {
        if self.from.is_empty() {
            self.from = self.kind.latest().to_string();
        }
    }

    /// Record an event at range position `position`.
    ///
    /// Returns `true` if the cursor advanced.
    pub fn observe(&mut self, position: u64) -> bool {
        let candidate = position.saturating_add(1);
        if self.is_sentinel() {
            self.from = encode_position(candidate);
            return true;
        }
        match parse_position(&self.from) {
            Some(current) if candidate > current => {
                self.from = encode_position(candidate);
                true
            }
            Some(_) => false,
            None => {
                tracing::error!(from = %self.from, "range cursor is not a number, leaving it unchanged");
                false
            }
        }
    }
}

/// `0x`-prefixed lowercase hex quantity.
pub fn encode_position(n: u64) -> String {
    format!("0x{n:x}")
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_position(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
