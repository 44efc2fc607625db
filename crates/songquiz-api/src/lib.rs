//! Song quiz HTTP API.
//!
//! The chat-platform bridge drives the engine through these routes and
//! reports voice presence and playback lifecycle back to it.

pub mod bridge;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::Router;

use crate::state::AppState;

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/stats", routes::stats::router())
        .nest("/api/v1/rooms", routes::rooms::router())
        .nest("/api/v1/media", routes::media::router())
        .nest("/api/v1/players", routes::players::router())
        .with_state(state)
}
