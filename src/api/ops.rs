//! Operational endpoints
//!
//! - GET /metrics - Prometheus text exposition
//! - GET /health - liveness plus a database round trip

use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
};
use http::{StatusCode, header};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::error::AppError;
use crate::metrics::REGISTRY;

/// Create the operational router
///
/// No authentication; bind the server to a private interface if the
/// counters should not be public.
pub fn ops_router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
}

async fn metrics() -> Result<Response, AppError> {
    let encoder = TextEncoder::new();
    let body = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response())
}

async fn health(State(state): State<AppState>) -> Response {
    match state.db.count_users().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response(),
        Err(error) => {
            tracing::error!(%error, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}
