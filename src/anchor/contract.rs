/// Submission and verification of anchors against the audit anchor contract.
///
/// One anchoring attempt moves through:
///
/// ```text
/// NotStarted ──▶ GasEstimated ──▶ Submitted ──▶ Confirmed
///      │               │              │
///      └───────────────┴──────────────┴──▶ Failed
/// ```
///
/// Failures never escape as errors: [`AnchorContract::anchor_audit_hash`]
/// returns [`AnchorOutcome::Failed`] carrying the last phase reached and the
/// underlying message.
use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use super::abi::{self, AnchorCalldata, OnChainAnchor};
use super::{AnchorPhase, AnchorSettings};
use crate::chain::rpc::{CallRequest, TransactionReceipt};
use crate::chain::{format_balance, ChainConnection};
use crate::error::{within, AnchorError, Result};

/// Successful anchoring attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorReceipt {
    pub transaction_hash: String,
    pub network: String,
    pub explorer_url: String,
    pub anchored_hash: String,
    pub log_count: u64,
    /// Unix seconds passed to the contract.
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    /// `None` when confirmation was not awaited.
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnchorOutcome {
    Confirmed(AnchorReceipt),
    Failed { phase: AnchorPhase, error: String },
}

impl AnchorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Receipt-level proof that a transaction was mined.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorVerification {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub status: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Verification plus what a user needs to check the proof themselves.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetails {
    pub exists: bool,
    pub transaction_hash: String,
    pub explorer_url: String,
    pub verification: Option<AnchorVerification>,
    /// Blocks mined on top of the transaction's block.
    pub confirmations: Option<u64>,
    pub from: Option<Address>,
    /// Decoded arguments when the transaction called `anchorAuditHash`
    /// on the configured contract.
    pub anchor: Option<AnchorCalldata>,
}

/// Gas limit sent with the transaction: estimate plus 20%.
pub fn gas_limit_with_headroom(estimate: u64) -> u64 {
    estimate.saturating_add(estimate / 5)
}

pub struct AnchorContract {
    connection: ChainConnection,
    settings: AnchorSettings,
}

impl AnchorContract {
    pub fn new(connection: ChainConnection, settings: AnchorSettings) -> Self {
        Self {
            connection,
            settings,
        }
    }

    pub fn connection(&self) -> &ChainConnection {
        &self.connection
    }

    pub fn settings(&self) -> &AnchorSettings {
        &self.settings
    }

    /// Anchor `hash` covering `log_count` logs. `timestamp` defaults to now.
    pub async fn anchor_audit_hash(
        &self,
        hash: &str,
        log_count: u64,
        timestamp: Option<u64>,
    ) -> AnchorOutcome {
        let mut phase = AnchorPhase::NotStarted;

        match self.attempt(hash, log_count, timestamp, &mut phase).await {
            Ok(receipt) => {
                info!(
                    tx_hash = %receipt.transaction_hash,
                    block = ?receipt.block_number,
                    log_count,
                    "Anchor confirmed"
                );
                AnchorOutcome::Confirmed(receipt)
            }
            Err(e) => {
                error!(phase = ?phase, error = %e, hash, "Anchor failed");
                AnchorOutcome::Failed {
                    phase,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn attempt(
        &self,
        hash: &str,
        log_count: u64,
        timestamp: Option<u64>,
        phase: &mut AnchorPhase,
    ) -> Result<AnchorReceipt> {
        let signer = self.connection.signer().ok_or_else(|| {
            AnchorError::Connectivity("Blockchain connection not initialized".into())
        })?;
        let rpc = self.connection.rpc();
        let network = self.connection.network();

        let balance = self.connection.balance_wei().await?;
        if balance < self.settings.min_balance_wei {
            return Err(AnchorError::Submission(format!(
                "Insufficient balance: {} available, at least {} required",
                format_balance(balance),
                format_balance(self.settings.min_balance_wei)
            )));
        }

        let timestamp =
            timestamp.unwrap_or_else(|| u64::try_from(Utc::now().timestamp()).unwrap_or_default());

        let mut request = CallRequest {
            from: Some(signer.address()),
            to: network.contract_address,
            data: abi::encode_anchor_call(hash, log_count, timestamp),
            gas: None,
            gas_price: None,
        };

        let estimate = rpc.estimate_gas(&request).await?;
        *phase = AnchorPhase::GasEstimated;
        debug!(estimate, "Gas estimated");

        let gas_price = rpc.gas_price().await?;
        let gas_limit = gas_limit_with_headroom(estimate);
        request.gas = Some(gas_limit);
        request.gas_price = Some(gas_price);

        let tx_hash = signer.submit(rpc, network.chain_id, &request).await?;
        *phase = AnchorPhase::Submitted;
        info!(tx_hash = %tx_hash, gas_limit, gas_price, "Anchor transaction submitted");

        let (block_number, gas_used, confirmations) = if self.settings.wait_for_receipt {
            let (receipt, confirmations) = self.wait_for_confirmation(&tx_hash).await?;
            (
                Some(receipt.block_number),
                Some(receipt.gas_used),
                Some(confirmations),
            )
        } else {
            (None, None, None)
        };
        *phase = AnchorPhase::Confirmed;

        Ok(AnchorReceipt {
            explorer_url: network.explorer_tx_url(&tx_hash),
            transaction_hash: tx_hash,
            network: network.name.clone(),
            anchored_hash: hash.to_string(),
            log_count,
            timestamp,
            gas_limit,
            gas_price,
            block_number,
            gas_used,
            confirmations,
        })
    }

    /// Wait until the receipt exists and is buried `confirmation_depth`
    /// blocks deep, bounded by `confirmation_timeout`.
    async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<(TransactionReceipt, u64)> {
        within(
            &format!("confirmation of {tx_hash}"),
            self.settings.confirmation_timeout,
            self.poll_confirmation(tx_hash),
        )
        .await
    }

    async fn poll_confirmation(&self, tx_hash: &str) -> Result<(TransactionReceipt, u64)> {
        let rpc = self.connection.rpc();
        let depth = self.settings.confirmation_depth;

        loop {
            if let Some(receipt) = rpc.transaction_receipt(tx_hash).await? {
                if !receipt.status {
                    return Err(AnchorError::Submission(format!(
                        "Transaction {tx_hash} reverted in block {}",
                        receipt.block_number
                    )));
                }

                let head = rpc.block_number().await?;
                let confirmations = head.saturating_sub(receipt.block_number);
                if confirmations >= depth {
                    return Ok((receipt, confirmations));
                }
                debug!(tx_hash, confirmations, depth, "Waiting for confirmations");
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Receipt and block time for `tx_hash`; `None` if the node has no receipt.
    pub async fn verify_anchor(&self, tx_hash: &str) -> Result<Option<AnchorVerification>> {
        let rpc = self.connection.rpc();

        let Some(receipt) = rpc.transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };

        let block = rpc.block_by_number(receipt.block_number).await?;
        let timestamp = block
            .and_then(|b| i64::try_from(b.timestamp).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(Some(AnchorVerification {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            status: receipt.status,
            timestamp,
        }))
    }

    pub async fn verify_transaction_with_details(&self, tx_hash: &str) -> Result<TransactionDetails> {
        let network = self.connection.network();
        let explorer_url = network.explorer_tx_url(tx_hash);

        let Some(verification) = self.verify_anchor(tx_hash).await? else {
            return Ok(TransactionDetails {
                exists: false,
                transaction_hash: tx_hash.to_string(),
                explorer_url,
                verification: None,
                confirmations: None,
                from: None,
                anchor: None,
            });
        };

        let rpc = self.connection.rpc();
        let head = rpc.block_number().await?;
        let confirmations = head.saturating_sub(verification.block_number);

        let tx = rpc.transaction_by_hash(tx_hash).await?;
        let from = tx.as_ref().map(|t| t.from);
        let anchor = tx
            .filter(|t| t.to == Some(network.contract_address))
            .and_then(|t| abi::decode_anchor_call(&t.input));

        Ok(TransactionDetails {
            exists: true,
            transaction_hash: tx_hash.to_string(),
            explorer_url,
            verification: Some(verification),
            confirmations: Some(confirmations),
            from,
            anchor,
        })
    }

    /// Read anchor `id` back from the contract.
    pub async fn get_anchor(&self, id: u64) -> Result<OnChainAnchor> {
        let request = CallRequest {
            from: None,
            to: self.connection.network().contract_address,
            data: abi::encode_get_anchor(id),
            gas: None,
            gas_price: None,
        };

        let output = self.connection.rpc().call(&request).await?;
        abi::decode_get_anchor(id, &output)
    }

    /// Whether the signer holds at least the configured minimum balance.
    pub async fn has_sufficient_balance(&self) -> Result<bool> {
        let balance: U256 = self.connection.balance_wei().await?;
        Ok(balance >= self.settings.min_balance_wei)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alloy::sol_types::SolCall;

    use super::*;
    use crate::chain::testing::{MockChain, GENESIS_TIME, MOCK_ACCOUNT};
    use crate::config::NetworkConfig;

    async fn contract_with(chain: Arc<MockChain>, settings: AnchorSettings) -> AnchorContract {
        let mut connection = ChainConnection::new(NetworkConfig::testnet(), chain);
        assert!(connection.initialize(None).await);
        AnchorContract::new(connection, settings)
    }

    async fn contract(chain: Arc<MockChain>) -> AnchorContract {
        contract_with(chain, AnchorSettings::default()).await
    }

    fn quick_settings() -> AnchorSettings {
        AnchorSettings {
            poll_interval: Duration::from_millis(100),
            confirmation_timeout: Duration::from_secs(10),
            ..AnchorSettings::default()
        }
    }

    #[test]
    fn test_gas_headroom_is_twenty_percent() {
        assert_eq!(gas_limit_with_headroom(100_000), 120_000);
        assert_eq!(gas_limit_with_headroom(21_001), 25_201);
        assert_eq!(gas_limit_with_headroom(0), 0);
    }

    #[tokio::test]
    async fn test_anchor_submits_with_inflated_gas() {
        let chain = Arc::new(MockChain::new());
        let contract = contract(chain.clone()).await;

        let outcome = contract
            .anchor_audit_hash("abc123", 3, Some(1_700_000_500))
            .await;
        assert!(outcome.is_success());

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, Some(MOCK_ACCOUNT));
        assert_eq!(sent[0].to, NetworkConfig::testnet().contract_address);
        assert_eq!(sent[0].gas, Some(120_000));
        assert_eq!(sent[0].gas_price, Some(30_000_000_000));

        let call = abi::decode_anchor_call(&sent[0].data).unwrap();
        assert_eq!(call.hash, "abc123");
        assert_eq!(call.log_count, 3);
        assert_eq!(call.timestamp, 1_700_000_500);

        let AnchorOutcome::Confirmed(receipt) = outcome else {
            unreachable!()
        };
        assert_eq!(receipt.block_number, Some(101));
        assert_eq!(receipt.gas_used, Some(100_000));
        assert_eq!(receipt.confirmations, Some(0));
        assert_eq!(
            receipt.explorer_url,
            format!(
                "https://amoy.polygonscan.com/tx/{}",
                receipt.transaction_hash
            )
        );
    }

    #[tokio::test]
    async fn test_timestamp_defaults_to_now() {
        let chain = Arc::new(MockChain::new());
        let contract = contract(chain.clone()).await;
        let before = Utc::now().timestamp() as u64;

        contract.anchor_audit_hash("h", 1, None).await;

        let call = abi::decode_anchor_call(&chain.sent()[0].data).unwrap();
        assert!(call.timestamp >= before);
    }

    #[tokio::test]
    async fn test_estimate_failure_keeps_message_verbatim() {
        let chain = Arc::new(MockChain::new());
        chain.fail_estimate("execution reverted: hash already anchored");
        let contract = contract(chain.clone()).await;

        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        match outcome {
            AnchorOutcome::Failed { phase, error } => {
                assert_eq!(phase, AnchorPhase::NotStarted);
                assert_eq!(error, "execution reverted: hash already anchored");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_after_estimate() {
        let chain = Arc::new(MockChain::new());
        chain.fail_send("nonce too low");
        let contract = contract(chain).await;

        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        assert!(matches!(
            outcome,
            AnchorOutcome::Failed { phase: AnchorPhase::GasEstimated, ref error } if error == "nonce too low"
        ));
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_refused_before_estimating() {
        let chain = Arc::new(MockChain::new());
        chain.set_balance(U256::from(10u64));
        chain.fail_estimate("should not be reached");
        let contract = contract(chain.clone()).await;

        assert!(!contract.has_sufficient_balance().await.unwrap());
        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        match outcome {
            AnchorOutcome::Failed { phase, error } => {
                assert_eq!(phase, AnchorPhase::NotStarted);
                assert!(error.starts_with("Insufficient balance"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uninitialized_connection_fails() {
        let chain = Arc::new(MockChain::new());
        let connection = ChainConnection::new(NetworkConfig::testnet(), chain.clone());
        let contract = AnchorContract::new(connection, AnchorSettings::default());

        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        match outcome {
            AnchorOutcome::Failed { error, .. } => assert!(error.contains("not initialized")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_without_waiting_submission_counts_as_confirmed() {
        let chain = Arc::new(MockChain::new());
        chain.set_mine_on_send(false);
        let settings = AnchorSettings {
            wait_for_receipt: false,
            ..AnchorSettings::default()
        };
        let contract = contract_with(chain, settings).await;

        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        let AnchorOutcome::Confirmed(receipt) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(receipt.block_number, None);
        assert_eq!(receipt.confirmations, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_confirmation_depth() {
        let chain = Arc::new(MockChain::new());
        let settings = AnchorSettings {
            confirmation_depth: 2,
            ..quick_settings()
        };
        let contract = contract_with(chain.clone(), settings).await;

        let miner = async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            chain.advance_blocks(1);
            tokio::time::sleep(Duration::from_millis(250)).await;
            chain.advance_blocks(1);
        };

        let (outcome, ()) = tokio::join!(contract.anchor_audit_hash("h", 1, Some(1)), miner);
        let AnchorOutcome::Confirmed(receipt) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(receipt.block_number, Some(101));
        assert_eq!(receipt.confirmations, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_transaction_confirms_once_mined() {
        let chain = Arc::new(MockChain::new());
        chain.set_mine_on_send(false);
        chain.set_gas_estimate(50_000);
        let contract = contract_with(chain.clone(), quick_settings()).await;

        let miner = async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            chain.mine();
        };

        let (outcome, ()) = tokio::join!(contract.anchor_audit_hash("h", 1, Some(1)), miner);
        let AnchorOutcome::Confirmed(receipt) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(chain.block_height(), 101);
        assert_eq!(receipt.block_number, Some(101));
        assert_eq!(receipt.gas_limit, 60_000);
        assert_eq!(receipt.gas_used, Some(50_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmined_transaction_times_out_as_submitted() {
        let chain = Arc::new(MockChain::new());
        chain.set_mine_on_send(false);
        let contract = contract_with(chain, quick_settings()).await;

        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        match outcome {
            AnchorOutcome::Failed { phase, error } => {
                assert_eq!(phase, AnchorPhase::Submitted);
                assert!(error.contains("timed out"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reverted_transaction_fails() {
        let chain = Arc::new(MockChain::new());
        chain.set_revert(true);
        let contract = contract(chain).await;

        let outcome = contract.anchor_audit_hash("h", 1, Some(1)).await;
        match outcome {
            AnchorOutcome::Failed { phase, error } => {
                assert_eq!(phase, AnchorPhase::Submitted);
                assert!(error.contains("reverted"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verify_unknown_transaction_is_none() {
        let contract = contract(Arc::new(MockChain::new())).await;
        assert!(contract.verify_anchor("0x1234").await.unwrap().is_none());

        let details = contract
            .verify_transaction_with_details("0x1234")
            .await
            .unwrap();
        assert!(!details.exists);
        assert!(details.verification.is_none());
        assert_eq!(details.explorer_url, "https://amoy.polygonscan.com/tx/0x1234");
    }

    #[tokio::test]
    async fn test_verify_returns_block_time() {
        let chain = Arc::new(MockChain::new());
        let contract = contract(chain).await;

        let AnchorOutcome::Confirmed(receipt) =
            contract.anchor_audit_hash("h", 1, Some(1)).await
        else {
            panic!("expected confirmation");
        };

        let verification = contract
            .verify_anchor(&receipt.transaction_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verification.block_number, 101);
        assert!(verification.status);
        assert_eq!(
            verification.timestamp.unwrap().timestamp() as u64,
            GENESIS_TIME + 202
        );
    }

    #[tokio::test]
    async fn test_details_recover_anchored_arguments() {
        let chain = Arc::new(MockChain::new());
        let contract = contract(chain.clone()).await;

        let AnchorOutcome::Confirmed(receipt) =
            contract.anchor_audit_hash("feedface", 9, Some(1_700_000_900)).await
        else {
            panic!("expected confirmation");
        };
        chain.advance_blocks(5);

        let details = contract
            .verify_transaction_with_details(&receipt.transaction_hash)
            .await
            .unwrap();
        assert!(details.exists);
        assert_eq!(details.confirmations, Some(5));
        assert_eq!(details.from, Some(MOCK_ACCOUNT));
        assert_eq!(
            details.anchor,
            Some(AnchorCalldata {
                hash: "feedface".to_string(),
                log_count: 9,
                timestamp: 1_700_000_900,
            })
        );
    }

    #[tokio::test]
    async fn test_get_anchor_reads_contract() {
        let chain = Arc::new(MockChain::new());
        chain.set_call_result(
            abi::AuditAnchor::getAnchorCall::abi_encode_returns(&(
                "cafe".to_string(),
                U256::from(4u64),
                U256::from(1_700_000_001u64),
                MOCK_ACCOUNT,
            ))
            .into(),
        );
        let contract = contract(chain).await;

        let anchor = contract.get_anchor(1).await.unwrap();
        assert_eq!(anchor.hash, "cafe");
        assert_eq!(anchor.log_count, 4);
        assert_eq!(anchor.submitter, MOCK_ACCOUNT);
    }
}
