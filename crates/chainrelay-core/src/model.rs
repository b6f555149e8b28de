//! Subscription and endpoint configuration.
//!
//! These values are created by the configuration store and are read-only to
//! the relay once loaded. Validation happens here so that an adapter only
//! ever sees a well-formed `Subscription`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Chain family served by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    #[serde(rename = "eth")]
    Ethereum,
    #[serde(rename = "binance-smart-chain")]
    BinanceSmartChain,
    #[serde(rename = "hmy")]
    Harmony,
    #[serde(rename = "klaytn")]
    Klaytn,
    #[serde(rename = "cfx")]
    Conflux,
    #[serde(rename = "xinfin")]
    XinFin,
    #[serde(rename = "substrate")]
    Substrate,
    #[serde(rename = "tezos")]
    Tezos,
    #[serde(rename = "ontology")]
    Ontology,
}

impl ChainType {
    pub const ALL: [ChainType; 9] = [
        Self::Ethereum,
        Self::BinanceSmartChain,
        Self::Harmony,
        Self::Klaytn,
        Self::Conflux,
        Self::XinFin,
        Self::Substrate,
        Self::Tezos,
        Self::Ontology,
    ];

    /// Short tag used in configuration files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "eth",
            Self::BinanceSmartChain => "binance-smart-chain",
            Self::Harmony => "hmy",
            Self::Klaytn => "klaytn",
            Self::Conflux => "cfx",
            Self::XinFin => "xinfin",
            Self::Substrate => "substrate",
            Self::Tezos => "tezos",
            Self::Ontology => "ontology",
        }
    }

    /// Returns `true` for chains served by the parametrized EVM adapter.
    pub fn is_evm_family(&self) -> bool {
        matches!(
            self,
            Self::Ethereum
                | Self::BinanceSmartChain
                | Self::Harmony
                | Self::Klaytn
                | Self::Conflux
                | Self::XinFin
        )
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChainType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownChain(s.to_string()))
    }
}

/// How the relay talks to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Persistent connection; the node streams events.
    Push,
    /// Request/response on a fixed interval.
    Poll,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Connection descriptor for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub chain: ChainType,
    /// Poll interval in seconds (poll connections only).
    #[serde(default = "default_refresh_interval", rename = "refreshInterval")]
    pub refresh_interval_secs: u64,
}

fn default_refresh_interval() -> u64 {
    5
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>, chain: ChainType) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            chain,
            refresh_interval_secs: default_refresh_interval(),
        }
    }

    /// Connection kind derived from the URL scheme.
    pub fn connection_kind(&self) -> Result<ConnectionKind, ConfigError> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(ConnectionKind::Push),
            "http" | "https" => Ok(ConnectionKind::Poll),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Validate the endpoint: non-empty name and a supported URL scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingEndpointName);
        }
        self.connection_kind().map(|_| ())
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

/// Durable per-job configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "endpoint")]
    pub endpoint_name: String,
    /// Contract / oracle addresses to watch.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Oracle account ids (Substrate).
    #[serde(default, rename = "accountIds")]
    pub account_ids: Vec<String>,
}

impl Subscription {
    pub fn new(job_id: impl Into<String>, endpoint_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            endpoint_name: endpoint_name.into(),
            addresses: Vec::new(),
            account_ids: Vec::new(),
        }
    }

    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_account_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.account_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Check the chain-specific parameters against the endpoint they will run on.
    pub fn validate_for(&self, endpoint: &Endpoint) -> Result<(), ConfigError> {
        endpoint.validate()?;
        match endpoint.chain {
            ChainType::Substrate if self.account_ids.is_empty() => {
                Err(ConfigError::MissingParameter {
                    chain: endpoint.chain.to_string(),
                    field: "accountIds",
                })
            }
            ChainType::Tezos | ChainType::Ontology if self.addresses.is_empty() => {
                Err(ConfigError::MissingParameter {
                    chain: endpoint.chain.to_string(),
                    field: "addresses",
                })
            }
            _ => Ok(()),
        }
    }
}
