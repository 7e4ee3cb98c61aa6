/// ABI of the audit anchor contract.
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use serde::Serialize;

use crate::error::{AnchorError, Result};

sol! {
    interface AuditAnchor {
        function anchorAuditHash(string hash, uint256 logCount, uint256 timestamp) external returns (uint256 id);
        function getAnchor(uint256 id) external view returns (string hash, uint256 logCount, uint256 timestamp, address submitter);
    }
}

/// Arguments of an `anchorAuditHash` call, as recovered from calldata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorCalldata {
    pub hash: String,
    pub log_count: u64,
    pub timestamp: u64,
}

/// An anchor as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnChainAnchor {
    pub id: u64,
    pub hash: String,
    pub log_count: u64,
    pub timestamp: u64,
    pub submitter: Address,
}

pub fn encode_anchor_call(hash: &str, log_count: u64, timestamp: u64) -> Bytes {
    AuditAnchor::anchorAuditHashCall {
        hash: hash.to_string(),
        logCount: U256::from(log_count),
        timestamp: U256::from(timestamp),
    }
    .abi_encode()
    .into()
}

/// Decode transaction input. `None` if it is not an `anchorAuditHash` call.
pub fn decode_anchor_call(input: &[u8]) -> Option<AnchorCalldata> {
    let call = AuditAnchor::anchorAuditHashCall::abi_decode(input, true).ok()?;
    Some(AnchorCalldata {
        hash: call.hash,
        log_count: u64::try_from(call.logCount).ok()?,
        timestamp: u64::try_from(call.timestamp).ok()?,
    })
}

pub fn encode_get_anchor(id: u64) -> Bytes {
    AuditAnchor::getAnchorCall { id: U256::from(id) }
        .abi_encode()
        .into()
}

pub fn decode_get_anchor(id: u64, output: &[u8]) -> Result<OnChainAnchor> {
    let ret = AuditAnchor::getAnchorCall::abi_decode_returns(output, true)
        .map_err(|e| AnchorError::Serialization(format!("Invalid getAnchor output: {e}")))?;

    Ok(OnChainAnchor {
        id,
        hash: ret.hash,
        log_count: to_u64(ret.logCount, "logCount")?,
        timestamp: to_u64(ret.timestamp, "timestamp")?,
        submitter: ret.submitter,
    })
}

fn to_u64(value: U256, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| AnchorError::Serialization(format!("{field} out of range: {value}")))
}
