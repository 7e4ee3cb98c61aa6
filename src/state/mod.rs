/// Persistence for anchoring.
///
/// Manages PostgreSQL connections and provides typed access to:
/// - The audit log table (read-only, owned by the portal)
/// - Anchor records (append-only)
///
/// [`memory`] holds in-process equivalents of both stores.
pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditLogEntry, AuditLogSource};
use crate::error::{AnchorError, Result};
use models::{AnchorRecord, NewAnchorRecord};

/// Append-only store of anchor records.
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Most recent record by creation time.
    async fn latest(&self) -> Result<Option<AnchorRecord>>;

    async fn count(&self) -> Result<u64>;

    /// Sum of `log_count` over all records.
    async fn total_logs_anchored(&self) -> Result<u64>;

    async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<AnchorRecord>>;

    /// Newest first.
    async fn list_recent(&self, limit: u64) -> Result<Vec<AnchorRecord>>;

    /// Append `record` if the newest stored record is still
    /// `expected_latest`, otherwise fail with [`AnchorError::Conflict`].
    async fn append(
        &self,
        record: NewAnchorRecord,
        expected_latest: Option<Uuid>,
    ) -> Result<AnchorRecord>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| AnchorError::Database(format!("Connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AnchorError::Database(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuditLogSource for Database {
    async fn fetch_ordered(&self, offset: u64, limit: u64) -> Result<Vec<AuditLogEntry>> {
        repository::fetch_audit_logs(&self.pool, offset, limit).await
    }

    async fn count(&self) -> Result<u64> {
        repository::count_audit_logs(&self.pool).await
    }
}

#[async_trait]
impl AnchorStore for Database {
    async fn latest(&self) -> Result<Option<AnchorRecord>> {
        repository::latest_anchor(&self.pool).await
    }

    async fn count(&self) -> Result<u64> {
        repository::count_anchors(&self.pool).await
    }

    async fn total_logs_anchored(&self) -> Result<u64> {
        repository::sum_anchored_logs(&self.pool).await
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> Result<Option<AnchorRecord>> {
        repository::find_anchor_by_tx(&self.pool, tx_hash).await
    }

    async fn list_recent(&self, limit: u64) -> Result<Vec<AnchorRecord>> {
        repository::list_anchors(&self.pool, limit).await
    }

    async fn append(
        &self,
        record: NewAnchorRecord,
        expected_latest: Option<Uuid>,
    ) -> Result<AnchorRecord> {
        repository::insert_anchor_if_latest(&self.pool, &record, expected_latest)
            .await?
            .ok_or_else(|| {
                AnchorError::Conflict(format!(
                    "a newer anchor was recorded after {expected_latest:?}"
                ))
            })
    }
}
