use axum::routing::{get, post};
use axum::Router;

use crate::handlers::scheduler;
use crate::state::AppState;

/// Routes mounted at `/scheduler`.
///
/// ```text
/// GET    /          -> get_state
/// POST   /start     -> start
/// POST   /stop      -> stop
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(scheduler::get_state))
        .route("/start", post(scheduler::start))
        .route("/stop", post(scheduler::stop))
}
