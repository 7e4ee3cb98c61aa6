/// Audit log hashing.
///
/// Reads ordered batches of audit log entries from an external store and
/// reduces them to a single SHA-256 fingerprint that can be anchored on
/// chain and recomputed later by anyone holding the same rows.
pub mod hash;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::{within, Result};

/// One immutable audit log row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Digest of one batch, handed to the anchoring step and then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct AuditHashResult {
    pub hash: String,
    pub log_count: u64,
    pub timestamp: DateTime<Utc>,
    pub source_logs: Vec<AuditLogEntry>,
}

/// Read access to the append-only audit log table.
///
/// Implementations return entries ordered by ascending timestamp (ties by
/// id) and report store failures as [`crate::error::AnchorError::Retrieval`].
#[async_trait]
pub trait AuditLogSource: Send + Sync {
    /// Up to `limit` entries, skipping the first `offset`.
    async fn fetch_ordered(&self, offset: u64, limit: u64) -> Result<Vec<AuditLogEntry>>;

    /// Total number of entries in the store.
    async fn count(&self) -> Result<u64>;
}

/// Fetches audit log batches and hashes them.
#[derive(Clone)]
pub struct HashService {
    source: Arc<dyn AuditLogSource>,
    timeout: Duration,
}

impl HashService {
    pub fn new(source: Arc<dyn AuditLogSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// The oldest `limit` entries.
    pub async fn fetch_batch(&self, limit: u64) -> Result<Vec<AuditLogEntry>> {
        self.fetch_window(0, limit).await
    }

    /// `limit` entries starting at position `offset` in timestamp order.
    pub async fn fetch_window(&self, offset: u64, limit: u64) -> Result<Vec<AuditLogEntry>> {
        let entries = within(
            "audit log fetch",
            self.timeout,
            self.source.fetch_ordered(offset, limit),
        )
        .await?;

        debug!(offset, limit, fetched = entries.len(), "Fetched audit log window");
        Ok(entries)
    }

    pub async fn count_logs(&self) -> Result<u64> {
        within("audit log count", self.timeout, self.source.count()).await
    }

    pub fn compute_hash(&self, entries: &[AuditLogEntry]) -> String {
        hash::compute_hash(entries)
    }

    pub async fn build_result(&self, limit: u64) -> Result<AuditHashResult> {
        self.build_window(0, limit).await
    }

    /// Fetch a window and hash it. Fails without hashing if the fetch fails.
    ///
    /// Windows are selected by position in `(timestamp, id)` order. This
    /// assumes the log is append-only in that order: a row committed late
    /// with a timestamp before an anchored window shifts every later window
    /// by one, and the affected anchors no longer verify against a rehash.
    pub async fn build_window(&self, offset: u64, limit: u64) -> Result<AuditHashResult> {
        let entries = self.fetch_window(offset, limit).await?;
        let hash = self.compute_hash(&entries);

        info!(
            offset,
            log_count = entries.len(),
            hash = %hash,
            "Computed audit log hash"
        );

        Ok(AuditHashResult {
            hash,
            log_count: entries.len() as u64,
            timestamp: Utc::now(),
            source_logs: entries,
        })
    }
}
