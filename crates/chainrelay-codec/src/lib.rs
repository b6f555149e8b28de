//! chainrelay-codec — turns raw oracle request payloads into canonical requests.
//!
//! Two layers:
//! - [`runlog`] splits the fixed 32-byte-word ABI header from the variable
//!   CBOR segment and synthesizes `address`, `dataPrefix`, `functionSelector`.
//! - [`cbor`] parses the request parameters, a CBOR map that is usually sent
//!   without its map delimiters.
//!
//! Both are pure: identical input bytes always produce identical output.

pub mod cbor;
pub mod runlog;

pub use cbor::parse_cbor_map;
pub use runlog::{decode_runlog, split_runlog, RunlogParts, FULFILLMENT_SELECTOR};
