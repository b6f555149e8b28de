//! chainrelay-service — runs subscriptions and delivers their requests.
//!
//! ```text
//! ConfigStore ──▶ SubscriptionManager ──▶ AdapterFactory ──▶ ProtocolAdapter task
//!                        │                                        │ RawChainEvent
//!                        └──────────── pump task ◀────────────────┘
//!                                         │ normalize (job id, decode)
//!                                         ▼
//!                                    Dispatcher ──▶ TriggerClient ──▶ /v2/specs/{job}/runs
//! ```

pub mod config;
pub mod dispatcher;
pub mod factory;
pub mod logging;
pub mod manager;
pub mod normalize;
pub mod trigger;

pub use config::{normalize_localhost, DispatchConfig, RelayConfig};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use factory::{AdapterFactory, DefaultAdapterFactory};
pub use logging::{init_tracing, LogConfig};
pub use manager::SubscriptionManager;
pub use normalize::normalize;
pub use trigger::{HttpTriggerClient, TriggerClient, TriggerError};
