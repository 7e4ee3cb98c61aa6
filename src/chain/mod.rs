/// Connection to the anchoring network.
///
/// Holds the network configuration chosen at construction, the signing
/// account established by [`ChainConnection::initialize`], and exposes the
/// read-only chain queries used for diagnostics and balance checks.
pub mod rpc;
pub mod signer;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{utils::format_ether, Address, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{network_name, NetworkConfig};
use crate::error::Result;
use rpc::{ChainRpc, HttpRpc};
use signer::AccountSigner;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub chain_id: u64,
    pub name: String,
    pub block_number: u64,
}

/// Snapshot of the connection for UI and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub account_address: Option<Address>,
    pub signer_mode: Option<&'static str>,
    pub network: NetworkConfig,
    pub balance: Option<String>,
    pub network_info: Option<NetworkInfo>,
    pub error: Option<String>,
}

pub struct ChainConnection {
    rpc: Arc<dyn ChainRpc>,
    network: NetworkConfig,
    signer: Option<AccountSigner>,
    is_connected: bool,
}

impl ChainConnection {
    pub fn new(network: NetworkConfig, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            rpc,
            network,
            signer: None,
            is_connected: false,
        }
    }

    /// Connect to `network.rpc_url` over HTTP.
    pub fn over_http(network: NetworkConfig, rpc_timeout: Duration) -> Self {
        let rpc = Arc::new(HttpRpc::new(network.rpc_url.clone(), rpc_timeout));
        Self::new(network, rpc)
    }

    /// Establish the signing account.
    ///
    /// With a private key, the account is derived locally. Without one, the
    /// node is asked for an account it signs for. Returns `false` when
    /// neither works; anchoring is unavailable in that case.
    pub async fn initialize(&mut self, private_key: Option<&str>) -> bool {
        self.signer = None;
        self.is_connected = false;

        let signer = match private_key {
            Some(key) => match AccountSigner::from_private_key(key) {
                Ok(signer) => signer,
                Err(e) => {
                    warn!(error = %e, "Could not load anchoring key");
                    return false;
                }
            },
            None => match self.rpc.request_accounts().await {
                Ok(accounts) => match accounts.first() {
                    Some(account) => AccountSigner::NodeManaged(*account),
                    None => {
                        warn!(network = %self.network.name, "Node exposes no accounts");
                        return false;
                    }
                },
                Err(e) => {
                    warn!(
                        network = %self.network.name,
                        error = %e,
                        "Could not request accounts from node"
                    );
                    return false;
                }
            },
        };

        info!(
            network = %self.network.name,
            account = %signer.address(),
            mode = signer.mode(),
            "Blockchain connection initialized"
        );

        self.signer = Some(signer);
        self.is_connected = true;
        true
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn signer(&self) -> Option<&AccountSigner> {
        self.signer.as_ref()
    }

    pub fn account_address(&self) -> Option<Address> {
        self.signer.as_ref().map(AccountSigner::address)
    }

    pub fn rpc(&self) -> &dyn ChainRpc {
        self.rpc.as_ref()
    }

    /// Signer balance in wei; zero without an account.
    pub async fn balance_wei(&self) -> Result<U256> {
        match self.account_address() {
            Some(address) => self.rpc.balance(address).await,
            None => Ok(U256::ZERO),
        }
    }

    /// Signer balance in whole native units, e.g. `"0.25"`.
    pub async fn get_balance(&self) -> Result<String> {
        if self.account_address().is_none() {
            return Ok("0".to_string());
        }
        Ok(format_balance(self.balance_wei().await?))
    }

    pub async fn get_network_info(&self) -> Result<NetworkInfo> {
        let chain_id = self.rpc.chain_id().await?;
        let block_number = self.rpc.block_number().await?;

        Ok(NetworkInfo {
            chain_id,
            name: network_name(chain_id),
            block_number,
        })
    }

    /// Never fails; query errors are reported in `error`.
    pub async fn get_connection_status(&self) -> ConnectionStatus {
        let mut errors = Vec::new();

        let balance = match self.get_balance().await {
            Ok(b) => Some(b),
            Err(e) => {
                errors.push(format!("balance: {e}"));
                None
            }
        };

        let network_info = match self.get_network_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                errors.push(format!("network: {e}"));
                None
            }
        };

        ConnectionStatus {
            is_connected: self.is_connected,
            account_address: self.account_address(),
            signer_mode: self.signer.as_ref().map(AccountSigner::mode),
            network: self.network.clone(),
            balance,
            network_info,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

/// Wei to a decimal string in whole units, trailing zeros removed.
pub fn format_balance(wei: U256) -> String {
    let formatted = format_ether(wei);
    if !formatted.contains('.') {
        return formatted;
    }
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
