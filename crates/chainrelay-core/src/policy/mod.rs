//! Timing policies shared by adapters.

pub mod backoff;

pub use backoff::ReconnectBackoff;
