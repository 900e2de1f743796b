//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                  -> list_jobs
/// POST   /                  -> submit_job
/// POST   /batch             -> submit_batch
/// GET    /status            -> job_counts
/// POST   /clear-completed   -> clear_completed
/// GET    /{id}              -> get_job
/// DELETE /{id}              -> remove_job
/// POST   /{id}/retry        -> retry_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/batch", post(jobs::submit_batch))
        .route("/status", get(jobs::job_counts))
        .route("/clear-completed", post(jobs::clear_completed))
        .route("/{id}", get(jobs::get_job).delete(jobs::remove_job))
        .route("/{id}/retry", post(jobs::retry_job))
}
