//! SCALE decoding of `System.Events` through a registry of known layouts.
//!
//! ```text
//! Vec<EventRecord>:
//!   compact(len)
//!   { phase | pallet: u8 | variant: u8 | fields… | topics: Vec<[u8; 32]> } × len
//! ```
//!
//! Field sizes are not self-describing, so an event whose `(pallet, variant)`
//! pair is not registered makes the rest of the buffer unreadable. Decoding
//! stops there and returns the records read so far.

use std::collections::HashMap;

use parity_scale_codec::{Compact, Decode};
use thiserror::Error;

/// Errors raised while decoding an events buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScaleError {
    #[error("SCALE decode failed: {0}")]
    Codec(String),

    #[error("unknown event phase {0}")]
    UnknownPhase(u8),
}

impl From<parity_scale_codec::Error> for ScaleError {
    fn from(e: parity_scale_codec::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Wire type of one event field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    AccountId32,
    /// Single-byte enum discriminant.
    U8,
    U32,
    U64,
    U128,
    /// `Vec<u8>`.
    Bytes,
    /// `Vec<Vec<u8>>`.
    VecBytes,
    Bool,
}

/// A decoded event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    AccountId([u8; 32]),
    U8(u8),
    U32(u32),
    U64(u64),
    U128(u128),
    Bytes(Vec<u8>),
    VecBytes(Vec<Vec<u8>>),
    Bool(bool),
}

impl FieldKind {
    fn decode(&self, input: &mut &[u8]) -> Result<FieldValue, ScaleError> {
        Ok(match self {
            Self::AccountId32 => FieldValue::AccountId(<[u8; 32]>::decode(input)?),
            Self::U8 => FieldValue::U8(u8::decode(input)?),
            Self::U32 => FieldValue::U32(u32::decode(input)?),
            Self::U64 => FieldValue::U64(u64::decode(input)?),
            Self::U128 => FieldValue::U128(u128::decode(input)?),
            Self::Bytes => FieldValue::Bytes(Vec::<u8>::decode(input)?),
            Self::VecBytes => FieldValue::VecBytes(Vec::<Vec<u8>>::decode(input)?),
            Self::Bool => FieldValue::Bool(bool::decode(input)?),
        })
    }
}

/// Name and field layout of one event variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLayout {
    pub pallet: String,
    pub variant: String,
    pub fields: Vec<(String, FieldKind)>,
}

impl EventLayout {
    pub fn new(pallet: &str, variant: &str, fields: &[(&str, FieldKind)]) -> Self {
        Self {
            pallet: pallet.to_string(),
            variant: variant.to_string(),
            fields: fields
                .iter()
                .map(|(name, kind)| (name.to_string(), *kind))
                .collect(),
        }
    }
}

/// `(pallet index, variant index)` → layout.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    layouts: HashMap<(u8, u8), EventLayout>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for a runtime with `System` at index 0 and the Chainlink
    /// pallet at `chainlink_pallet`.
    pub fn runlog(chainlink_pallet: u8) -> Self {
        use FieldKind::*;
        let mut registry = Self::new();
        registry.register(
            0,
            0,
            EventLayout::new(
                "System",
                "ExtrinsicSuccess",
                &[("weight", U64), ("class", U8), ("pays_fee", U8)],
            ),
        );
        registry.register(0, 2, EventLayout::new("System", "CodeUpdated", &[]));
        registry.register(0, 3, EventLayout::new("System", "NewAccount", &[("account", AccountId32)]));
        registry.register(0, 4, EventLayout::new("System", "KilledAccount", &[("account", AccountId32)]));
        registry.register(
            chainlink_pallet,
            0,
            EventLayout::new(
                "Chainlink",
                "OracleRegistered",
                &[("oracle", AccountId32), ("spec_index", Bytes)],
            ),
        );
        registry.register(
            chainlink_pallet,
            1,
            EventLayout::new(
                "Chainlink",
                "OracleRequest",
                &[
                    ("oracle", AccountId32),
                    ("spec_index", Bytes),
                    ("request_id", U64),
                    ("requester", AccountId32),
                    ("data_version", U64),
                    ("bytes", VecBytes),
                    ("callback", Bytes),
                    ("payment", U128),
                ],
            ),
        );
        registry.register(
            chainlink_pallet,
            2,
            EventLayout::new(
                "Chainlink",
                "OracleAnswer",
                &[
                    ("oracle", AccountId32),
                    ("request_id", U64),
                    ("requester", AccountId32),
                    ("result", Bytes),
                    ("payment", U128),
                ],
            ),
        );
        registry.register(chainlink_pallet, 3, EventLayout::new("Chainlink", "KillRequest", &[("request_id", U64)]));
        registry
    }

    pub fn register(&mut self, pallet: u8, variant: u8, layout: EventLayout) {
        self.layouts.insert((pallet, variant), layout);
    }

    pub fn lookup(&self, pallet: u8, variant: u8) -> Option<&EventLayout> {
        self.layouts.get(&(pallet, variant))
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// When in the block an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

impl Phase {
    fn decode(input: &mut &[u8]) -> Result<Self, ScaleError> {
        match u8::decode(input)? {
            0 => Ok(Self::ApplyExtrinsic(u32::decode(input)?)),
            1 => Ok(Self::Finalization),
            2 => Ok(Self::Initialization),
            other => Err(ScaleError::UnknownPhase(other)),
        }
    }
}

/// One decoded event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub phase: Phase,
    pub pallet: String,
    pub variant: String,
    pub fields: Vec<(String, FieldValue)>,
    pub topics: Vec<[u8; 32]>,
}

impl EventRecord {
    pub fn is(&self, pallet: &str, variant: &str) -> bool {
        self.pallet == pallet && self.variant == variant
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Decode a `Vec<EventRecord>` storage value.
pub fn decode_event_records(registry: &EventRegistry, data: &[u8]) -> Result<Vec<EventRecord>, ScaleError> {
    let input = &mut &data[..];
    let count = <Compact<u32>>::decode(input)?.0;
    let mut records = Vec::with_capacity(count.min(1024) as usize);

    for index in 0..count {
        let phase = Phase::decode(input)?;
        let pallet = u8::decode(input)?;
        let variant = u8::decode(input)?;
        let Some(layout) = registry.lookup(pallet, variant) else {
            tracing::debug!(
                index,
                pallet,
                variant,
                decoded = records.len(),
                "unregistered event, stopping decode"
            );
            break;
        };
        let mut fields = Vec::with_capacity(layout.fields.len());
        for (name, kind) in &layout.fields {
            fields.push((name.clone(), kind.decode(input)?));
        }
        let topics = Vec::<[u8; 32]>::decode(input)?;
        records.push(EventRecord {
            phase,
            pallet: layout.pallet.clone(),
            variant: layout.variant.clone(),
            fields,
            topics,
        });
    }

    Ok(records)
}
