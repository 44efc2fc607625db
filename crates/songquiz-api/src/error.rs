//! Song quiz API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use songquiz_core::error::GameError;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `GameError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub GameError);

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            GameError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            GameError::PlayerNotFound(_) => (StatusCode::NOT_FOUND, "player_not_found"),
            GameError::AlreadyInSession(_) => (StatusCode::CONFLICT, "already_in_session"),
            GameError::SessionEnded(_) => (StatusCode::CONFLICT, "session_ended"),
            GameError::SongQuery(_) => (StatusCode::UNPROCESSABLE_ENTITY, "song_query_error"),
            GameError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "connection_error"),
            GameError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            GameError::StreamFault(_) => (StatusCode::INTERNAL_SERVER_ERROR, "stream_fault"),
            GameError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error")
            }
        };

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
