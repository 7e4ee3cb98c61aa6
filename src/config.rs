/// Configuration for the anchoring service.
///
/// Values come from an optional TOML file; every section has defaults so an
/// empty file (or no file) yields a working testnet configuration. CLI flags
/// and environment variables are applied on top by the binary.
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, utils::parse_ether, Address};
use serde::{Deserialize, Serialize};

use crate::anchor::AnchorSettings;
use crate::error::{AnchorError, Result};

/// Chain id of the test network preset (Polygon Amoy).
pub const TESTNET_CHAIN_ID: u64 = 80002;
/// Chain id of the main network preset (Polygon PoS).
pub const MAINNET_CHAIN_ID: u64 = 137;

const TESTNET_CONTRACT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
const MAINNET_CONTRACT: Address = address!("e7f1725e7734ce288f8367e1bb143e90bb3f0512");

/// A resolved network: where to send RPC calls and which contract to call.
///
/// Fixed for the lifetime of a [`crate::chain::ChainConnection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub contract_address: Address,
    pub explorer_url: String,
}

impl NetworkConfig {
    pub fn testnet() -> Self {
        Self {
            chain_id: TESTNET_CHAIN_ID,
            name: network_name(TESTNET_CHAIN_ID),
            rpc_url: "https://rpc-amoy.polygon.technology".to_string(),
            contract_address: TESTNET_CONTRACT,
            explorer_url: "https://amoy.polygonscan.com".to_string(),
        }
    }

    pub fn mainnet() -> Self {
        Self {
            chain_id: MAINNET_CHAIN_ID,
            name: network_name(MAINNET_CHAIN_ID),
            rpc_url: "https://polygon-rpc.com".to_string(),
            contract_address: MAINNET_CONTRACT,
            explorer_url: "https://polygonscan.com".to_string(),
        }
    }

    /// Pick one of the two presets.
    pub fn preset(use_mainnet: bool) -> Self {
        if use_mainnet {
            Self::mainnet()
        } else {
            Self::testnet()
        }
    }

    /// Explorer link for a transaction: `{explorer}/tx/{hash}`.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }
}

/// Human-readable network name for a chain id.
pub fn network_name(chain_id: u64) -> String {
    match chain_id {
        TESTNET_CHAIN_ID => "Polygon Amoy Testnet".to_string(),
        MAINNET_CHAIN_ID => "Polygon Mainnet".to_string(),
        other => format!("Unknown Network ({other})"),
    }
}

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkSection,
    pub anchoring: AnchoringSection,
    pub timeouts: TimeoutSection,
    pub database: DatabaseSection,
    pub server: ServerSection,
    pub log: LogSection,
}

/// `[network]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Use the main network preset instead of the test network.
    pub mainnet: bool,
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    pub explorer_url: Option<String>,
}

/// `[anchoring]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnchoringSection {
    /// Minimum signer balance, in whole native units, required to anchor.
    pub min_balance: String,
    /// Blocks required on top of the anchoring transaction's block.
    pub confirmation_depth: u64,
    /// When false, the node accepting the transaction counts as confirmation.
    pub wait_for_receipt: bool,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
}

impl Default for AnchoringSection {
    fn default() -> Self {
        Self {
            min_balance: "0.001".to_string(),
            confirmation_depth: 0,
            wait_for_receipt: true,
            poll_interval_ms: 2_000,
            confirmation_timeout_secs: 180,
        }
    }
}

/// `[timeouts]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    /// Deadline for each blockchain RPC call.
    pub rpc_secs: u64,
    /// Deadline for each audit log / anchor store call.
    pub store_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            rpc_secs: 30,
            store_secs: 30,
        }
    }
}

/// `[database]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p)?;
                Self::from_toml(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| AnchorError::Config(format!("Invalid config: {e}")))
    }

    /// Resolve the network preset and apply overrides.
    pub fn network_config(&self) -> Result<NetworkConfig> {
        let mut network = NetworkConfig::preset(self.network.mainnet);

        if let Some(url) = &self.network.rpc_url {
            network.rpc_url = url.clone();
        }
        if let Some(addr) = &self.network.contract_address {
            network.contract_address = Address::from_str(addr).map_err(|e| {
                AnchorError::Config(format!("Invalid contract address {addr}: {e}"))
            })?;
        }
        if let Some(url) = &self.network.explorer_url {
            network.explorer_url = url.clone();
        }

        Ok(network)
    }

    pub fn anchor_settings(&self) -> Result<AnchorSettings> {
        let min_balance_wei = parse_ether(&self.anchoring.min_balance).map_err(|e| {
            AnchorError::Config(format!(
                "Invalid min_balance {}: {e}",
                self.anchoring.min_balance
            ))
        })?;

        Ok(AnchorSettings {
            min_balance_wei,
            wait_for_receipt: self.anchoring.wait_for_receipt,
            confirmation_depth: self.anchoring.confirmation_depth,
            poll_interval: Duration::from_millis(self.anchoring.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(self.anchoring.confirmation_timeout_secs),
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.rpc_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.store_secs)
    }
}
