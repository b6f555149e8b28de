//! chainrelay-substrate — runlog requests from Substrate chains.
//!
//! The adapter subscribes to the `System.Events` storage item, decodes each
//! change as a list of event records, and relays `Chainlink.OracleRequest`
//! events addressed to one of the configured oracle accounts.
//!
//! Decoding is driven by an [`EventRegistry`] of known event layouts rather
//! than by runtime metadata.

pub mod adapter;
pub mod request;
pub mod scale;
pub mod storage;

pub use adapter::{SubstrateAdapter, SubstrateConfig};
pub use request::{string_pairs_to_kv, OracleRequest};
pub use scale::{decode_event_records, EventLayout, EventRecord, EventRegistry, FieldKind, FieldValue, Phase, ScaleError};
pub use storage::{StorageChangeSet, SYSTEM_EVENTS_KEY};
