/// Repository layer: typed database queries for anchoring.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;
use crate::audit::AuditLogEntry;
use crate::error::{AnchorError, Result};

/// Advisory lock key serializing anchor inserts across processes.
const ANCHOR_INSERT_LOCK: i64 = 0x4155_4449_5441_4e43;

fn db_err(e: sqlx::Error) -> AnchorError {
    AnchorError::Database(e.to_string())
}

fn retrieval_err(e: sqlx::Error) -> AnchorError {
    AnchorError::Retrieval(e.to_string())
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

// ── Audit Logs ──

pub async fn fetch_audit_logs(pool: &PgPool, offset: u64, limit: u64) -> Result<Vec<AuditLogEntry>> {
    sqlx::query_as::<_, AuditLogEntry>(
        r#"
        SELECT id::text AS id, actor_id::text AS actor_id, action, target_type,
               target_id::text AS target_id, "timestamp", metadata
        FROM audit_logs
        ORDER BY "timestamp" ASC, id ASC
        OFFSET $1 LIMIT $2
        "#,
    )
    .bind(to_i64(offset))
    .bind(to_i64(limit))
    .fetch_all(pool)
    .await
    .map_err(retrieval_err)
}

pub async fn count_audit_logs(pool: &PgPool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
        .fetch_one(pool)
        .await
        .map_err(retrieval_err)?;
    Ok(to_u64(count))
}

// ── Anchors ──

pub async fn latest_anchor(pool: &PgPool) -> Result<Option<AnchorRecord>> {
    sqlx::query_as::<_, AnchorRecord>(
        "SELECT * FROM audit_anchors ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .map_err(db_err)
}

pub async fn count_anchors(pool: &PgPool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_anchors")
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
    Ok(to_u64(count))
}

pub async fn sum_anchored_logs(pool: &PgPool) -> Result<u64> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(log_count), 0)::BIGINT FROM audit_anchors")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;
    Ok(to_u64(total))
}

pub async fn find_anchor_by_tx(pool: &PgPool, tx_hash: &str) -> Result<Option<AnchorRecord>> {
    sqlx::query_as::<_, AnchorRecord>(
        "SELECT * FROM audit_anchors WHERE blockchain_tx_hash = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
    .map_err(db_err)
}

pub async fn list_anchors(pool: &PgPool, limit: u64) -> Result<Vec<AnchorRecord>> {
    sqlx::query_as::<_, AnchorRecord>(
        "SELECT * FROM audit_anchors ORDER BY created_at DESC, id DESC LIMIT $1",
    )
    .bind(to_i64(limit))
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

/// Insert `record` only if the newest anchor is still `expected_latest`.
///
/// Runs under a transaction-scoped advisory lock. Returns `None` when a
/// newer anchor was written since the caller read `expected_latest`.
pub async fn insert_anchor_if_latest(
    pool: &PgPool,
    record: &NewAnchorRecord,
    expected_latest: Option<Uuid>,
) -> Result<Option<AnchorRecord>> {
    let mut tx = pool.begin().await.map_err(db_err)?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ANCHOR_INSERT_LOCK)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

    let latest: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM audit_anchors ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_err)?;

    if latest != expected_latest {
        tx.rollback().await.map_err(db_err)?;
        return Ok(None);
    }

    let inserted = sqlx::query_as::<_, AnchorRecord>(
        r#"
        INSERT INTO audit_anchors (id, hash, log_count, blockchain_tx_hash, blockchain_network, block_number, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(&record.hash)
    .bind(to_i64(record.log_count))
    .bind(record.blockchain_tx_hash.as_deref())
    .bind(&record.blockchain_network)
    .bind(record.block_number.map(to_i64))
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;

    Ok(Some(inserted))
}
