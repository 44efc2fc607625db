//! Per-player profiles.

use axum::extract::{Path, State};
use axum::{Json, Router, routing::get};
use songquiz_core::ids::PlayerId;
use songquiz_core::ports::PlayerProfile;
use songquiz_session::application::query_handlers;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /{player_id}/profile
#[instrument(skip(state), fields(player_id = %player_id))]
async fn profile(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerProfile>, ApiError> {
    let profile =
        query_handlers::get_player_profile(&PlayerId::new(player_id), state.engine.store())
            .await?;
    info!("profile retrieved");
    Ok(Json(profile))
}

/// Returns the router for player profiles.
pub fn router() -> Router<AppState> {
    Router::new().route("/{player_id}/profile", get(profile))
}
