//! Health check and metrics handlers.
//!
//! - `/health`: liveness, returns OK while the process runs
//! - `/ready`: readiness, checks the store and that rooms are still routed
//! - `/metrics`: Prometheus scrape

use crate::errors::PartyError;
use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Liveness probe. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe: 200 when the store answers and the registry accepts
/// rooms, 503 otherwise.
///
/// Failure details are logged, not returned.
#[tracing::instrument(skip_all, name = "party.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.service.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                store: "healthy".to_string(),
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "party.handlers.health", error = %e, "Readiness check failed");
            let store = if matches!(e, PartyError::Store(_)) {
                "unhealthy"
            } else {
                "healthy"
            };
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready".to_string(),
                    store: store.to_string(),
                }),
            )
        }
    }
}

/// Prometheus text exposition.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
