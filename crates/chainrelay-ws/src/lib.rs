//! chainrelay-ws — one persistent JSON-RPC push subscription per connection.
//!
//! The subscriber owns its socket in a background task. It re-sends the
//! subscribe request after every reconnect and forwards each notification's
//! `result` to the adapter in arrival order.

pub mod subscriber;

pub use subscriber::{call_once, SubscribeSpec, WsConfig, WsSubscriber};
