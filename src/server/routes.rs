/// REST routes for anchoring status, runs and proof lookup.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AppState;
use crate::chain::ConnectionStatus;
use crate::error::AnchorError;
use crate::policy::{
    AnchorRecordVerification, AnchoringOptions, AnchoringReport, AnchoringStatus, NewLogsCheck,
};
use crate::state::models::AnchorRecord;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: AnchorError) -> ApiError {
    let status = match &e {
        AnchorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AnchorError::Connectivity(_) | AnchorError::Rpc(_) | AnchorError::Submission(_) => {
            StatusCode::BAD_GATEWAY
        }
        AnchorError::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
        AnchorError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!(status = %status, error = %e, "Request failed");
    }

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ─── Health ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Anchoring ───────────────────────────────────────────

/// Body of POST /api/anchoring/run. Both fields are optional.
#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    force: bool,
    #[serde(default = "default_persist")]
    persist: bool,
}

fn default_persist() -> bool {
    true
}

/// GET /api/anchoring/status
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<AnchoringStatus>, ApiError> {
    state
        .policy
        .get_anchoring_status()
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/anchoring/check
async fn check(State(state): State<Arc<AppState>>) -> Result<Json<NewLogsCheck>, ApiError> {
    state
        .policy
        .check_for_new_logs()
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/anchoring/run
///
/// An empty body runs with the defaults. A body that is present must parse,
/// otherwise nothing is submitted.
async fn run(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<AnchoringReport>), ApiError> {
    let options = if body.is_empty() {
        AnchoringOptions::default()
    } else {
        let Json(req) = Json::<RunRequest>::from_bytes(&body).map_err(|rejection| {
            (
                rejection.status(),
                Json(ErrorResponse {
                    error: rejection.body_text(),
                }),
            )
        })?;
        AnchoringOptions {
            force: req.force,
            persist: req.persist,
            timestamp: None,
        }
    };

    let report = state
        .policy
        .perform_smart_anchoring(options)
        .await
        .map_err(api_error)?;

    let status = if report.was_anchored() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

/// GET /api/anchoring/connection
async fn connection(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    Json(
        state
            .policy
            .contract()
            .connection()
            .get_connection_status()
            .await,
    )
}

pub fn anchoring_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/anchoring/status", get(status))
        .route("/api/anchoring/check", get(check))
        .route("/api/anchoring/run", post(run))
        .route("/api/anchoring/connection", get(connection))
}

// ─── Anchor records ──────────────────────────────────────

const DEFAULT_LIST_LIMIT: u64 = 20;
const MAX_LIST_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<u64>,
}

/// GET /api/anchors: most recent anchor records, newest first.
async fn list_anchors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AnchorRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    state
        .policy
        .recent_anchors(limit)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/anchors/:tx_hash/verify
async fn verify(
    State(state): State<Arc<AppState>>,
    Path(tx_hash): Path<String>,
) -> Result<(StatusCode, Json<AnchorRecordVerification>), ApiError> {
    let result = state
        .policy
        .verify_anchor_record(&tx_hash)
        .await
        .map_err(api_error)?;

    let status = if result.transaction.exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(result)))
}

pub fn verification_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/anchors", get(list_anchors))
        .route("/api/anchors/:tx_hash/verify", get(verify))
}
