/// Database models for anchoring.
///
/// These structs map directly to PostgreSQL tables and are used
/// for both reading and writing via sqlx.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted anchor. Append-only: never updated after insert.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    /// Hex SHA-256 of the anchored audit log window.
    pub hash: String,
    /// Number of audit log rows covered by `hash`.
    pub log_count: i64,
    pub blockchain_tx_hash: Option<String>,
    pub blockchain_network: String,
    pub block_number: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl AnchorRecord {
    pub fn log_count(&self) -> u64 {
        u64::try_from(self.log_count).unwrap_or(0)
    }
}

/// Values for a new anchor row; id and creation time are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnchorRecord {
    pub hash: String,
    pub log_count: u64,
    pub blockchain_tx_hash: Option<String>,
    pub blockchain_network: String,
    pub block_number: Option<u64>,
}
