/// In-memory audit log and anchor stores.
///
/// Same semantics as the PostgreSQL-backed stores, without a database.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::models::{AnchorRecord, NewAnchorRecord};
use super::AnchorStore;
use crate::audit::{AuditLogEntry, AuditLogSource};
use crate::error::{AnchorError, Result};

/// Audit log held in a `RwLock<Vec>`; ordering is applied on read.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
    unavailable: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: AuditLogEntry) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate the store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AnchorError::Retrieval("audit log store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLogSource for MemoryAuditLog {
    async fn fetch_ordered(&self, offset: u64, limit: u64) -> Result<Vec<AuditLogEntry>> {
        self.check_available()?;

        let mut entries = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.len() as u64)
    }
}

/// Anchor records in insertion order.
#[derive(Default)]
pub struct MemoryAnchorStore {
    records: RwLock<Vec<AnchorRecord>>,
}

impl MemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnchorRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AnchorStore for MemoryAnchorStore {
    async fn latest(&self) -> Result<Option<AnchorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.last().cloned())
    }

    async fn count(&self) -> Result<u64> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.len() as u64)
    }

    async fn total_logs_anchored(&self) -> Result<u64> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().map(AnchorRecord::log_count).sum())
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<AnchorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .rev()
            .find(|r| r.blockchain_tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn list_recent(&self, limit: u64) -> Result<Vec<AnchorRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn append(
        &self,
        record: NewAnchorRecord,
        expected_latest: Option<Uuid>,
    ) -> Result<AnchorRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());

        let latest = records.last().map(|r| r.id);
        if latest != expected_latest {
            return Err(AnchorError::Conflict(format!(
                "expected latest anchor {expected_latest:?}, found {latest:?}"
            )));
        }

        let stored = AnchorRecord {
            id: Uuid::now_v7(),
            hash: record.hash,
            log_count: i64::try_from(record.log_count).unwrap_or(i64::MAX),
            blockchain_tx_hash: record.blockchain_tx_hash,
            blockchain_network: record.blockchain_network,
            block_number: record
                .block_number
                .map(|b| i64::try_from(b).unwrap_or(i64::MAX)),
            created_at: Utc::now(),
        };

        debug!(id = %stored.id, log_count = stored.log_count, "Stored anchor record in memory");
        records.push(stored.clone());
        Ok(stored)
    }
}
