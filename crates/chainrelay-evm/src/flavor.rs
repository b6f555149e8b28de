//! Per-chain method names and range semantics.

use chainrelay_core::model::ChainType;
use chainrelay_core::range::RangeKind;

/// JSON-RPC method names used by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodTable {
    pub get_logs: &'static str,
    pub subscribe: &'static str,
    pub unsubscribe: &'static str,
    /// Returns the current head number (block or epoch).
    pub head: &'static str,
}

const ETH: MethodTable = MethodTable {
    get_logs: "eth_getLogs",
    subscribe: "eth_subscribe",
    unsubscribe: "eth_unsubscribe",
    head: "eth_blockNumber",
};

const HMY: MethodTable = MethodTable {
    get_logs: "hmy_getLogs",
    subscribe: "hmy_subscribe",
    unsubscribe: "hmy_unsubscribe",
    head: "hmy_blockNumber",
};

const KLAY: MethodTable = MethodTable {
    get_logs: "klay_getLogs",
    subscribe: "klay_subscribe",
    unsubscribe: "klay_unsubscribe",
    head: "klay_blockNumber",
};

const CFX: MethodTable = MethodTable {
    get_logs: "cfx_getLogs",
    subscribe: "cfx_subscribe",
    unsubscribe: "cfx_unsubscribe",
    head: "cfx_epochNumber",
};

/// An EVM-style chain served by [`crate::EvmAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmFlavor {
    Ethereum,
    BinanceSmartChain,
    Harmony,
    Klaytn,
    Conflux,
    /// Ethereum dialect; addresses are written `xdc…` instead of `0x…`.
    XinFin,
}

impl EvmFlavor {
    pub fn from_chain(chain: ChainType) -> Option<Self> {
        match chain {
            ChainType::Ethereum => Some(Self::Ethereum),
            ChainType::BinanceSmartChain => Some(Self::BinanceSmartChain),
            ChainType::Harmony => Some(Self::Harmony),
            ChainType::Klaytn => Some(Self::Klaytn),
            ChainType::Conflux => Some(Self::Conflux),
            ChainType::XinFin => Some(Self::XinFin),
            _ => None,
        }
    }

    pub fn chain(&self) -> ChainType {
        match self {
            Self::Ethereum => ChainType::Ethereum,
            Self::BinanceSmartChain => ChainType::BinanceSmartChain,
            Self::Harmony => ChainType::Harmony,
            Self::Klaytn => ChainType::Klaytn,
            Self::Conflux => ChainType::Conflux,
            Self::XinFin => ChainType::XinFin,
        }
    }

    /// BSC and XinFin speak the Ethereum dialect.
    pub fn methods(&self) -> MethodTable {
        match self {
            Self::Ethereum | Self::BinanceSmartChain | Self::XinFin => ETH,
            Self::Harmony => HMY,
            Self::Klaytn => KLAY,
            Self::Conflux => CFX,
        }
    }

    pub fn range_kind(&self) -> RangeKind {
        match self {
            Self::Conflux => RangeKind::Epoch,
            _ => RangeKind::Block,
        }
    }

    /// Rewrite a chain-native address into the `0x` form the node filter and
    /// the job node expect.
    pub fn normalize_address(&self, address: &str) -> String {
        match self {
            Self::XinFin => match address.get(..3) {
                Some(prefix) if prefix.eq_ignore_ascii_case("xdc") => format!("0x{}", &address[3..]),
                _ => address.to_string(),
            },
            _ => address.to_string(),
        }
    }

    /// Conflux pushes chain-reorg notices on the logs subscription.
    pub fn has_revert_notices(&self) -> bool {
        matches!(self, Self::Conflux)
    }
}
