//! Handlers for the `/jobs` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use renderq_core::job::{JobStatus, NewRenderJob};
use renderq_core::types::JobId;
use renderq_engine::EngineError;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for `GET /jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedJobs {
    pub ids: Vec<JobId>,
}

#[derive(Debug, Serialize)]
pub struct ClearedJobs {
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate and enqueue one render job. Returns 201 with the queued job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<NewRenderJob>,
) -> AppResult<impl IntoResponse> {
    let id = state.scheduler.submit(input)?;
    let job = state.scheduler.get(id).ok_or(EngineError::JobNotFound(id))?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// POST /api/v1/jobs/batch
///
/// Enqueue several jobs. Nothing is enqueued if any job fails validation.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(input): Json<Vec<NewRenderJob>>,
) -> AppResult<impl IntoResponse> {
    let ids = state.scheduler.submit_batch(input)?;
    tracing::info!(count = ids.len(), "Job batch submitted");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: SubmittedJobs { ids },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// All jobs in submission order, optionally filtered by `?status=`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let mut jobs = state.scheduler.list();
    if let Some(status) = params.status {
        jobs.retain(|job| job.status == status);
    }
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/status
pub async fn job_counts(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.scheduler.statuses(),
    }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .scheduler
        .get(job_id)
        .ok_or(EngineError::JobNotFound(job_id))?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Re-queue a finished job with its attempt count reset. 409 while the job
/// is assigned or rendering.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.scheduler.retry(job_id)?;
    Ok(Json(DataResponse { data: job }))
}

/// DELETE /api/v1/jobs/{id}
pub async fn remove_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.remove(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/clear-completed
pub async fn clear_completed(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let removed = state.scheduler.clear_completed();
    Ok(Json(DataResponse {
        data: ClearedJobs { removed },
    }))
}
