//! Run control for the scheduler loops.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SchedulerState {
    pub running: bool,
    /// Whether this request changed the state.
    pub changed: bool,
}

/// GET /api/v1/scheduler
pub async fn get_state(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: SchedulerState {
            running: state.scheduler.is_running(),
            changed: false,
        },
    }))
}

/// POST /api/v1/scheduler/start
pub async fn start(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let changed = state.scheduler.start();
    Ok(Json(DataResponse {
        data: SchedulerState {
            running: true,
            changed,
        },
    }))
}

/// POST /api/v1/scheduler/stop
pub async fn stop(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let changed = state.scheduler.stop();
    Ok(Json(DataResponse {
        data: SchedulerState {
            running: false,
            changed,
        },
    }))
}
