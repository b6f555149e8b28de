//! chainrelay-ontology — runlog requests from Ontology oracle contracts.
//!
//! Ontology nodes expose no event subscription, so the adapter scans every
//! block height for smart contract notifications and relays the
//! `oracleRequest` notifications emitted by the watched contracts.

pub mod adapter;
pub mod notify;

pub use adapter::{OntologyAdapter, SCAN_INTERVAL};
pub use notify::{ContractEvent, Notify};
