//! Process-wide usage statistics.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use songquiz_session::application::query_handlers::{self, UsageStats};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/v1/stats
async fn usage_stats(State(state): State<AppState>) -> Result<Json<UsageStats>, ApiError> {
    let engine = &state.engine;
    let stats =
        query_handlers::get_usage_stats(engine.registry(), engine.store(), engine.clock().now())
            .await?;
    Ok(Json(stats))
}

/// Returns the router for usage statistics.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(usage_stats))
}
