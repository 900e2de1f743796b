use axum::routing::get;
use axum::Router;

use crate::handlers::nodes;
use crate::state::AppState;

/// Routes mounted at `/nodes`.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(nodes::list_nodes))
}
