use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use renderq_core::job::{NewRenderJob, RenderJob};
use renderq_core::workflow;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/workflows
pub async fn list_workflows() -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: workflow::catalog(),
    }))
}

/// POST /api/v1/workflows/{id}/preview
///
/// Build the graph the scheduler would submit for `input` on workflow
/// `id`, without enqueueing anything. 404 for an unregistered id.
pub async fn preview_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(input): Json<NewRenderJob>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let job = RenderJob::from_new(
        input,
        uuid::Uuid::new_v4(),
        Utc::now(),
        state.scheduler.config().default_max_attempts,
    );
    let built = workflow::build_by_id(&job, &workflow_id, &BTreeMap::new())?;
    Ok(Json(DataResponse { data: built }))
}
