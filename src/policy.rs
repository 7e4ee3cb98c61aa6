/// Anchoring policy: decides whether new audit logs need anchoring and
/// runs the hash, anchor and persist steps when they do.
///
/// The number of logs already anchored is the sum of `log_count` over all
/// stored anchor records. Each run hashes exactly the window of logs that
/// follows, so consecutive anchors cover disjoint, contiguous ranges.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::anchor::{AnchorContract, AnchorOutcome, AnchorReceipt, TransactionDetails};
use crate::audit::HashService;
use crate::error::{within, AnchorError, Result};
use crate::state::models::{AnchorRecord, NewAnchorRecord};
use crate::state::AnchorStore;

/// Result of comparing the audit log against what has been anchored.
#[derive(Debug, Clone, Serialize)]
pub struct NewLogsCheck {
    pub should_anchor: bool,
    pub new_logs_count: u64,
    pub total_logs: u64,
    pub last_anchored_count: u64,
    pub last_anchor: Option<AnchorRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct AnchoringOptions {
    /// Anchor even when no new logs exist.
    pub force: bool,
    /// Store an anchor record after a confirmed submission.
    pub persist: bool,
    /// Contract timestamp override (Unix seconds).
    pub timestamp: Option<u64>,
}

impl Default for AnchoringOptions {
    fn default() -> Self {
        Self {
            force: false,
            persist: true,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AnchoringReport {
    /// Nothing new and not forced. The chain was not contacted.
    Skipped { check: NewLogsCheck },
    Anchored {
        check: NewLogsCheck,
        receipt: AnchorReceipt,
        /// `None` when persistence was disabled.
        record: Option<AnchorRecord>,
    },
}

impl AnchoringReport {
    pub fn was_anchored(&self) -> bool {
        matches!(self, Self::Anchored { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchoringStatus {
    pub total_anchors: u64,
    pub last_anchor_at: Option<DateTime<Utc>>,
    pub last_transaction_hash: Option<String>,
    pub total_logs_anchored: u64,
    pub pending_logs: u64,
    pub network: String,
    /// Whether the signer can pay for another anchor. `None` if the chain
    /// could not be queried.
    pub sufficient_balance: Option<bool>,
}

/// On-chain transaction details cross-checked against the stored record.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorRecordVerification {
    pub transaction: TransactionDetails,
    pub record: Option<AnchorRecord>,
    pub hash_matches: Option<bool>,
    pub log_count_matches: Option<bool>,
    /// Mined, successful, and matching the stored record.
    pub verified: bool,
}

pub struct SmartAnchoringPolicy {
    hasher: HashService,
    contract: AnchorContract,
    anchors: Arc<dyn AnchorStore>,
    store_timeout: Duration,
    /// Serializes runs within this process.
    guard: Mutex<()>,
}

impl SmartAnchoringPolicy {
    pub fn new(
        hasher: HashService,
        contract: AnchorContract,
        anchors: Arc<dyn AnchorStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            hasher,
            contract,
            anchors,
            store_timeout,
            guard: Mutex::new(()),
        }
    }

    pub fn hasher(&self) -> &HashService {
        &self.hasher
    }

    pub fn contract(&self) -> &AnchorContract {
        &self.contract
    }

    /// Compare the audit log size with the anchored total. Read-only.
    pub async fn check_for_new_logs(&self) -> Result<NewLogsCheck> {
        let last_anchor = within("anchor store read", self.store_timeout, self.anchors.latest()).await?;
        let last_anchored_count = within(
            "anchor store read",
            self.store_timeout,
            self.anchors.total_logs_anchored(),
        )
        .await?;
        let total_logs = self.hasher.count_logs().await?;

        let new_logs_count = total_logs.saturating_sub(last_anchored_count);

        debug!(total_logs, last_anchored_count, new_logs_count, "Checked for new audit logs");

        Ok(NewLogsCheck {
            should_anchor: new_logs_count > 0,
            new_logs_count,
            total_logs,
            last_anchored_count,
            last_anchor,
        })
    }

    /// Anchor the logs written since the last anchor, if any.
    ///
    /// Any failure aborts the run before a record is written. Concurrent
    /// callers in this process queue behind one another; writers in other
    /// processes are caught by the store's compare-and-swap.
    pub async fn perform_smart_anchoring(&self, options: AnchoringOptions) -> Result<AnchoringReport> {
        let _running = self.guard.lock().await;

        let check = self.check_for_new_logs().await?;
        if !check.should_anchor && !options.force {
            info!(total_logs = check.total_logs, "No new audit logs, skipping anchor");
            return Ok(AnchoringReport::Skipped { check });
        }

        // Windows are positional: rows must land at the end of the
        // (timestamp, id) order, never before an already anchored offset.
        let batch = self
            .hasher
            .build_window(check.last_anchored_count, check.new_logs_count)
            .await?;

        let receipt = match self
            .contract
            .anchor_audit_hash(&batch.hash, batch.log_count, options.timestamp)
            .await
        {
            AnchorOutcome::Confirmed(receipt) => receipt,
            AnchorOutcome::Failed { phase, error } => {
                return Err(AnchorError::Submission(format!(
                    "Anchoring failed during {phase}: {error}"
                )));
            }
        };

        if !options.persist {
            info!(tx_hash = %receipt.transaction_hash, "Anchored without persisting record");
            return Ok(AnchoringReport::Anchored {
                check,
                receipt,
                record: None,
            });
        }

        let new_record = NewAnchorRecord {
            hash: batch.hash,
            log_count: batch.log_count,
            blockchain_tx_hash: Some(receipt.transaction_hash.clone()),
            blockchain_network: receipt.network.clone(),
            block_number: receipt.block_number,
        };
        let expected_latest = check.last_anchor.as_ref().map(|r| r.id);

        let record = within(
            "anchor store write",
            self.store_timeout,
            self.anchors.append(new_record, expected_latest),
        )
        .await
        .inspect_err(|e| {
            warn!(tx_hash = %receipt.transaction_hash, error = %e, "Anchor confirmed on-chain but not recorded");
        })?;

        info!(
            id = %record.id,
            tx_hash = %receipt.transaction_hash,
            log_count = record.log_count,
            "Anchor recorded"
        );

        Ok(AnchoringReport::Anchored {
            check,
            receipt,
            record: Some(record),
        })
    }

    pub async fn get_anchoring_status(&self) -> Result<AnchoringStatus> {
        let total_anchors = within("anchor store read", self.store_timeout, self.anchors.count()).await?;
        let check = self.check_for_new_logs().await?;

        Ok(AnchoringStatus {
            total_anchors,
            last_anchor_at: check.last_anchor.as_ref().map(|r| r.created_at),
            last_transaction_hash: check
                .last_anchor
                .as_ref()
                .and_then(|r| r.blockchain_tx_hash.clone()),
            total_logs_anchored: check.last_anchored_count,
            pending_logs: check.new_logs_count,
            network: self.contract.connection().network().name.clone(),
            sufficient_balance: self.contract.has_sufficient_balance().await.ok(),
        })
    }

    /// Stored anchor records, newest first.
    pub async fn recent_anchors(&self, limit: u64) -> Result<Vec<AnchorRecord>> {
        within("anchor store read", self.store_timeout, self.anchors.list_recent(limit)).await
    }

    /// Look up `tx_hash` on-chain and compare it with the stored record.
    pub async fn verify_anchor_record(&self, tx_hash: &str) -> Result<AnchorRecordVerification> {
        let transaction = self.contract.verify_transaction_with_details(tx_hash).await?;
        let record = within(
            "anchor store read",
            self.store_timeout,
            self.anchors.find_by_tx_hash(tx_hash),
        )
        .await?;

        let (hash_matches, log_count_matches) = match (&record, &transaction.anchor) {
            (Some(record), Some(onchain)) => (
                Some(record.hash == onchain.hash),
                Some(record.log_count() == onchain.log_count),
            ),
            _ => (None, None),
        };

        let mined = transaction
            .verification
            .as_ref()
            .is_some_and(|v| v.status);
        let verified = mined && hash_matches == Some(true) && log_count_matches == Some(true);

        Ok(AnchorRecordVerification {
            transaction,
            record,
            hash_matches,
            log_count_matches,
            verified,
        })
    }
}
