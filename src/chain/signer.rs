/// Transaction signing for the anchoring account.
///
/// Two modes:
/// - `Local`: a private key held by this process. Transactions are built as
///   legacy transactions, signed here and broadcast raw.
/// - `NodeManaged`: an account unlocked in the node (or a wallet proxy in
///   front of it). The node signs on `eth_sendTransaction`.
use std::fmt;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;

use super::rpc::{CallRequest, ChainRpc};
use crate::error::{AnchorError, Result};

#[derive(Clone)]
pub enum AccountSigner {
    Local(PrivateKeySigner),
    NodeManaged(Address),
}

impl AccountSigner {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_private_key(key_hex: &str) -> Result<Self> {
        let signer: PrivateKeySigner = key_hex
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| AnchorError::Config(format!("Invalid private key: {e}")))?;
        Ok(Self::Local(signer))
    }

    pub fn address(&self) -> Address {
        match self {
            Self::Local(signer) => signer.address(),
            Self::NodeManaged(address) => *address,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Local(_) => "local-key",
            Self::NodeManaged(_) => "node-managed",
        }
    }

    /// Sign (if local) and broadcast. `request.gas` and `request.gas_price`
    /// must be set. Returns the transaction hash.
    pub async fn submit(
        &self,
        rpc: &dyn ChainRpc,
        chain_id: u64,
        request: &CallRequest,
    ) -> Result<String> {
        match self {
            Self::NodeManaged(address) => {
                let mut request = request.clone();
                request.from = Some(*address);
                rpc.send_transaction(&request).await
            }
            Self::Local(signer) => {
                let raw = sign_legacy(rpc, signer, chain_id, request).await?;
                rpc.send_raw_transaction(raw).await
            }
        }
    }
}

impl fmt::Debug for AccountSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSigner")
            .field("mode", &self.mode())
            .field("address", &self.address())
            .finish()
    }
}

async fn sign_legacy(
    rpc: &dyn ChainRpc,
    signer: &PrivateKeySigner,
    chain_id: u64,
    request: &CallRequest,
) -> Result<Bytes> {
    let gas_limit = request
        .gas
        .ok_or_else(|| AnchorError::Submission("Gas limit not set".into()))?;
    let gas_price = request
        .gas_price
        .ok_or_else(|| AnchorError::Submission("Gas price not set".into()))?;

    let nonce = rpc.transaction_count(signer.address()).await?;

    let tx = TxLegacy {
        chain_id: Some(chain_id),
        nonce,
        gas_price,
        gas_limit,
        to: TxKind::Call(request.to),
        value: U256::ZERO,
        input: request.data.clone(),
    };

    let sig_hash = tx.signature_hash();
    let sig = signer
        .sign_hash(&sig_hash)
        .await
        .map_err(|e| AnchorError::Submission(format!("Signing failed: {e}")))?;

    let signed = TxEnvelope::Legacy(tx.into_signed(sig));

    let mut raw = Vec::new();
    signed.encode_2718(&mut raw);
    Ok(Bytes::from(raw))
}
