//! chainrelay-evm — one adapter for every EVM-style chain.
//!
//! Ethereum, Binance Smart Chain, Harmony, Klaytn and Conflux differ only in
//! their method prefixes and in whether ranges count blocks or epochs. An
//! [`EvmFlavor`] captures those differences; [`EvmAdapter`] does the rest in
//! either push (`*_subscribe`) or poll (`*_getLogs`) mode.

pub mod adapter;
pub mod flavor;
pub mod log;

pub use adapter::EvmAdapter;
pub use flavor::{EvmFlavor, MethodTable};
pub use log::{parse_logs, parse_notification, EvmLog};
