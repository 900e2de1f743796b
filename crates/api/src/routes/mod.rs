pub mod health;
pub mod jobs;
pub mod nodes;
pub mod scheduler;
pub mod workflows;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                              scheduler event stream (WebSocket)
///
/// /jobs                            list, submit
/// /jobs/batch                      submit batch (POST)
/// /jobs/status                     status counts (GET)
/// /jobs/clear-completed            delete completed jobs (POST)
/// /jobs/{id}                       get, remove
/// /jobs/{id}/retry                 re-queue (POST)
///
/// /nodes                           node statuses
///
/// /scheduler                       run state (GET)
/// /scheduler/start                 enable auto-run (POST)
/// /scheduler/stop                  disable auto-run (POST)
///
/// /workflows                       registered templates
/// /workflows/{id}/preview          build a graph without queueing (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/jobs", jobs::router())
        .nest("/nodes", nodes::router())
        .nest("/scheduler", scheduler::router())
        .nest("/workflows", workflows::router())
}
