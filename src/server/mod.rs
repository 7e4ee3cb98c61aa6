/// HTTP API for audit log anchoring.
///
/// A thin layer over [`SmartAnchoringPolicy`]. Authentication is handled
/// upstream by the portal; this server exposes no credentials of its own.
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AnchorError;
use crate::policy::SmartAnchoringPolicy;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub policy: Arc<SmartAnchoringPolicy>,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::anchoring_routes())
        .merge(routes::verification_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server.
pub async fn serve(state: AppState, addr: &str) -> crate::error::Result<()> {
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AnchorError::Io)?;

    tracing::info!("audit-anchor API server listening on {addr}");

    axum::serve(listener, app).await.map_err(AnchorError::Io)?;

    Ok(())
}
