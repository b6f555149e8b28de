//! chainrelay-tezos — runlog requests from Tezos oracle contracts.
//!
//! Tezos has no log subscription. The adapter follows the node's head
//! monitor, fetches each new block's manager operations and reads oracle
//! requests out of the `%requests` big_map diff of the watched contracts.

pub mod adapter;
pub mod michelson;
pub mod operations;
pub mod rpc;

pub use adapter::{TezosAdapter, TezosError, MONITOR_RETRY_INTERVAL};
pub use michelson::{Expr, MichelsonError};
pub use rpc::{HeadLines, HttpTezosRpc, TezosRpc};
