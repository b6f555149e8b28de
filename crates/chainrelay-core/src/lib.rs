//! chainrelay-core — shared building blocks for the chainrelay oracle bridge.
//!
//! ```text
//!  node ──▶ ProtocolAdapter ──▶ RawChainEvent ──▶ SubscriptionManager ──▶ Dispatcher ──▶ trigger API
//!              │                                        │
//!              └── FilterQuery / RangeTracker           └── PayloadDecoder → CanonicalRequest
//! ```
//!
//! This crate holds the pieces every other crate agrees on: JSON-RPC wire
//! types, the transport and adapter traits, the data model, the range/filter
//! machinery used by poll-based adapters, and the configuration store seam.

pub mod adapter;
pub mod canonical;
pub mod error;
pub mod filter;
pub mod jobid;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod range;
pub mod request;
pub mod store;
pub mod transport;

pub use adapter::{
    emit, shutdown_channel, AdapterState, EventSink, LogEvent, ProtocolAdapter, RawChainEvent,
    Shutdown, ShutdownTrigger, StructuredRequest,
};
pub use canonical::CanonicalRequest;
pub use error::{
    AdapterError, ConfigError, DecodeError, FilterError, StoreError, SubscriptionError,
    TransportError,
};
pub use filter::{FilterQuery, QueryMode};
pub use metrics::{RelayMetrics, SourcePing};
pub use model::{ChainType, ConnectionKind, Endpoint, Subscription};
pub use range::{RangeKind, RangeTracker};
pub use store::{ConfigStore, InMemoryConfigStore};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
