//! Builds the protocol adapter for a subscription.
//!
//! | chain                         | push (ws/wss)     | poll (http/https) |
//! |-------------------------------|-------------------|-------------------|
//! | eth, bsc, hmy, klaytn, cfx    | `*_subscribe`     | `*_getLogs`       |
//! | xinfin (`xdc` addresses)      | `eth_subscribe`   | `eth_getLogs`     |
//! | substrate                     | `System.Events`   | -                 |
//! | tezos                         | -                 | head monitor      |
//! | ontology                      | -                 | height scan       |

use std::sync::Arc;
use std::time::Duration;

use chainrelay_core::error::{AdapterError, ConfigError};
use chainrelay_core::{ChainType, ConnectionKind, Endpoint, ProtocolAdapter, Subscription};
use chainrelay_evm::{EvmAdapter, EvmFlavor};
use chainrelay_http::{HttpClientConfig, HttpRpcClient};
use chainrelay_ontology::OntologyAdapter;
use chainrelay_substrate::{SubstrateAdapter, SubstrateConfig};
use chainrelay_tezos::{HttpTezosRpc, TezosAdapter};
use chainrelay_ws::WsConfig;

/// Creates one adapter per subscription.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, sub: &Subscription, endpoint: &Endpoint) -> Result<Box<dyn ProtocolAdapter>, AdapterError>;
}

/// The adapters shipped with the relay.
#[derive(Debug, Clone)]
pub struct DefaultAdapterFactory {
    pub ws: WsConfig,
    pub substrate: SubstrateConfig,
    /// Timeout of single HTTP requests to nodes.
    pub request_timeout: Duration,
}

impl Default for DefaultAdapterFactory {
    fn default() -> Self {
        Self {
            ws: WsConfig::default(),
            substrate: SubstrateConfig::default(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl DefaultAdapterFactory {
    fn http(&self, url: &str) -> Result<Arc<HttpRpcClient>, AdapterError> {
        let config = HttpClientConfig {
            request_timeout: self.request_timeout,
        };
        Ok(Arc::new(HttpRpcClient::new(url, config)?))
    }
}

fn unsupported(chain: ChainType, kind: ConnectionKind) -> AdapterError {
    ConfigError::UnsupportedConnection(chain.to_string(), kind.to_string()).into()
}

impl AdapterFactory for DefaultAdapterFactory {
    fn build(&self, sub: &Subscription, endpoint: &Endpoint) -> Result<Box<dyn ProtocolAdapter>, AdapterError> {
        sub.validate_for(endpoint)?;
        let kind = endpoint.connection_kind()?;
        let url = endpoint.url.as_str();
        let job_id = sub.job_id.as_str();

        if let Some(flavor) = EvmFlavor::from_chain(endpoint.chain) {
            let adapter = match kind {
                ConnectionKind::Push => {
                    EvmAdapter::push(flavor, url, job_id, sub.addresses.clone(), self.ws.clone())?
                }
                ConnectionKind::Poll => EvmAdapter::poll(
                    flavor,
                    self.http(url)?,
                    job_id,
                    sub.addresses.clone(),
                    endpoint.refresh_interval(),
                ),
            };
            return Ok(Box::new(adapter));
        }

        match (endpoint.chain, kind) {
            (ChainType::Substrate, ConnectionKind::Push) => Ok(Box::new(SubstrateAdapter::new(
                url,
                job_id,
                &sub.account_ids,
                &self.substrate,
                self.ws.clone(),
            )?)),
            (ChainType::Tezos, ConnectionKind::Poll) => {
                let rpc = HttpTezosRpc::new(url, self.request_timeout)?;
                Ok(Box::new(TezosAdapter::new(Arc::new(rpc), job_id, sub.addresses.clone())))
            }
            (ChainType::Ontology, ConnectionKind::Poll) => Ok(Box::new(OntologyAdapter::new(
                self.http(url)?,
                job_id,
                sub.addresses.clone(),
            ))),
            (chain, kind) => Err(unsupported(chain, kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(chain: ChainType, url: &str, sub: Subscription) -> Result<String, AdapterError> {
        let endpoint = Endpoint::new("node", url, chain);
        DefaultAdapterFactory::default()
            .build(&sub, &endpoint)
            .map(|a| a.name().to_string())
    }

    fn sub() -> Subscription {
        Subscription::new("job-1", "node").with_addresses(["0xoracle"])
    }

    #[test]
    fn evm_family_by_scheme() {
        assert_eq!(build(ChainType::Ethereum, "wss://n", sub()).unwrap(), "eth/push");
        assert_eq!(build(ChainType::Ethereum, "http://n", sub()).unwrap(), "eth/poll");
        assert_eq!(build(ChainType::Conflux, "http://n", sub()).unwrap(), "cfx/poll");
        assert_eq!(build(ChainType::Klaytn, "ws://n", sub()).unwrap(), "klaytn/push");
        assert_eq!(build(ChainType::XinFin, "http://n", sub()).unwrap(), "xinfin/poll");
    }

    #[test]
    fn other_chains() {
        let account = format!("0x{}", "11".repeat(32));
        let substrate = Subscription::new("job-1", "node").with_account_ids([account]);
        assert_eq!(build(ChainType::Substrate, "ws://n", substrate).unwrap(), "substrate/push");
        assert_eq!(build(ChainType::Tezos, "http://n", sub()).unwrap(), "tezos/monitor");
        assert_eq!(build(ChainType::Ontology, "http://n", sub()).unwrap(), "ontology/scan");
    }

    #[test]
    fn unsupported_combinations() {
        for (chain, url) in [
            (ChainType::Tezos, "wss://n"),
            (ChainType::Ontology, "ws://n"),
        ] {
            assert!(matches!(
                build(chain, url, sub()),
                Err(AdapterError::Config(ConfigError::UnsupportedConnection(..)))
            ));
        }
        let account = format!("0x{}", "11".repeat(32));
        let substrate = Subscription::new("job-1", "node").with_account_ids([account]);
        assert!(matches!(
            build(ChainType::Substrate, "http://n", substrate),
            Err(AdapterError::Config(ConfigError::UnsupportedConnection(..)))
        ));
    }

    #[test]
    fn config_errors_surface() {
        assert!(matches!(
            build(ChainType::Ethereum, "ftp://n", sub()),
            Err(AdapterError::Config(ConfigError::UnsupportedScheme(_)))
        ));
        assert!(matches!(
            build(ChainType::Substrate, "ws://n", sub()),
            Err(AdapterError::Config(ConfigError::MissingParameter { .. }))
        ));
    }
}
