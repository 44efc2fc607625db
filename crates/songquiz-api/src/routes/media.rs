//! Track metadata reported by the bridge.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::put};
use serde::Deserialize;
use songquiz_core::error::GameError;
use tracing::{debug, instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for PUT /{media_ref}/duration.
#[derive(Debug, Deserialize)]
pub struct DurationRequest {
    /// Track length in seconds.
    pub seconds: f64,
}

/// PUT /{media_ref}/duration
#[instrument(skip(state, request), fields(seconds = request.seconds))]
async fn record_duration(
    State(state): State<AppState>,
    Path(media_ref): Path<String>,
    Json(request): Json<DurationRequest>,
) -> Result<StatusCode, ApiError> {
    if !request.seconds.is_finite() || request.seconds <= 0.0 {
        return Err(GameError::Validation("duration must be a positive number of seconds".into()).into());
    }
    debug!(%media_ref, "track duration recorded");
    state.media.record_duration(media_ref, request.seconds);
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the router for track metadata.
pub fn router() -> Router<AppState> {
    Router::new().route("/{media_ref}/duration", put(record_duration))
}
