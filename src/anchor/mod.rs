/// Blockchain anchoring of audit log hashes.
///
/// An anchor is a transaction calling `anchorAuditHash(hash, logCount,
/// timestamp)` on a fixed contract. Once mined, it proves the hash existed
/// at that block's time; anyone holding the same audit rows can recompute
/// the hash and compare.
pub mod abi;
pub mod contract;

use std::time::Duration;

use alloy::primitives::{utils::parse_ether, U256};
use serde::Serialize;

pub use contract::{
    AnchorContract, AnchorOutcome, AnchorReceipt, AnchorVerification, TransactionDetails,
};

/// Phases of a single anchoring attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPhase {
    NotStarted,
    GasEstimated,
    Submitted,
    Confirmed,
}

impl std::fmt::Display for AnchorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::GasEstimated => "gas estimated",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
        };
        f.write_str(name)
    }
}

/// Tuning for anchoring attempts.
#[derive(Debug, Clone)]
pub struct AnchorSettings {
    /// Anchoring is refused below this signer balance.
    pub min_balance_wei: U256,
    /// When false, the node accepting the transaction counts as confirmation.
    pub wait_for_receipt: bool,
    /// Blocks required on top of the transaction's block.
    pub confirmation_depth: u64,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self {
            min_balance_wei: parse_ether("0.001").unwrap_or(U256::ZERO),
            wait_for_receipt: true,
            confirmation_depth: 0,
            poll_interval: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(180),
        }
    }
}
