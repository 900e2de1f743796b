use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub scheduler_running: bool,
    pub nodes: usize,
}

/// GET /health
///
/// `degraded` when no compute nodes are registered.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let nodes = state.scheduler.node_statuses().len();
    let status = if nodes > 0 { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        scheduler_running: state.scheduler.is_running(),
        nodes,
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
