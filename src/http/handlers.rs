//! Request handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::health::HealthReport;
use crate::http::server::AppState;

/// GET /health/live - the process is up.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// GET /health/ready - every registered probe passes.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.run_checks().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// GET /v1/breakers - state of every circuit breaker.
pub async fn list_breakers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.breakers.snapshots())
}

/// POST /v1/breakers/{resource}/reset - force a breaker closed.
pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> impl IntoResponse {
    if state.breakers.reset(&resource) {
        tracing::info!(resource = %resource, "Breaker reset over HTTP");
        (StatusCode::OK, Json(json!({ "resource": resource, "status": "closed" })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown resource '{resource}'") })),
        )
    }
}

/// DELETE /v1/cache/{resource} - drop everything cached for a resource.
pub async fn clear_cache(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> impl IntoResponse {
    let prefix = state.cache.namespace(&resource);
    let removed = state.cache.clear_pattern(&prefix).await;
    tracing::info!(resource = %resource, removed, "Cache cleared over HTTP");
    Json(json!({ "resource": resource, "removed": removed }))
}
