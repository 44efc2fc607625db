//! Song quiz API server entry point.

use std::sync::Arc;

use songquiz_api::config::ServerConfig;
use songquiz_api::error::AppError;
use songquiz_api::state::AppState;
use songquiz_core::clock::SystemClock;
use songquiz_core::event::DomainEvent;
use songquiz_core::rng::SystemRng;
use songquiz_session::application::command_handlers::GameEngine;
use songquiz_store::{PgPersistenceStore, PgSongSelector};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting song quiz API server");

    let config = ServerConfig::from_env()?;

    // Create database connection pool and bring the schema up to date.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let app_state = AppState::new(
        Arc::new(PgSongSelector::new(pool.clone())),
        Arc::new(PgPersistenceStore::new(pool)),
        Arc::new(SystemClock),
        Box::new(SystemRng::new()),
        config.engine,
    );
    spawn_event_log(&app_state.engine);

    // TODO: Replace CorsLayer::permissive() with the bridge's origin once it is fixed.
    let app = songquiz_api::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

/// Logs every outbound game event.
fn spawn_event_log(engine: &GameEngine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    event_type = event.event_type(),
                    room_id = %event.room_id,
                    session_id = %event.metadata.session_id,
                    sequence = event.metadata.sequence_number,
                    payload = %event.to_payload(),
                    "game event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
