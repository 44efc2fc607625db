//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use songquiz_core::ports::SelectedSong;
use songquiz_session::application::command_handlers::EngineSettings;
use songquiz_test_support::{FixedClock, MockRng, RecordingStore, ScriptedSongSelector};
use tower::ServiceExt;

use songquiz_api::state::AppState;

/// Settle delay used by every test app.
pub const SETTLE: Duration = Duration::from_secs(3);

/// A catalog song whose media reference is `<slug>-ref`.
pub fn song(name: &str, artist: &str, slug: &str) -> SelectedSong {
    SelectedSong {
        name: name.to_owned(),
        artist: artist.to_owned(),
        media_ref: format!("{slug}-ref"),
        aliases: Vec::new(),
    }
}

/// Builds app state around a scripted catalog and a recording store.
pub fn build_test_state(songs: ScriptedSongSelector, store: Arc<RecordingStore>) -> AppState {
    let clock = FixedClock::start();
    AppState::new(
        Arc::new(songs),
        store,
        Arc::new(clock),
        Box::new(MockRng),
        EngineSettings {
            settle_delay: SETTLE,
            ..EngineSettings::default()
        },
    )
}

/// Builds the full app router with a two-song catalog. Uses the same route
/// structure as `main.rs`.
pub fn build_test_app() -> (Router, AppState, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::new());
    let songs = ScriptedSongSelector::new(vec![
        song("Psycho", "Red Velvet", "psycho"),
        song("Fire", "BTS", "fire"),
    ]);
    let state = build_test_state(songs, Arc::clone(&store));
    (songquiz_api::app(state.clone()), state, store)
}

/// Lets spawned engine tasks run past the settle delay.
pub async fn settle() {
    tokio::time::sleep(SETTLE + Duration::from_millis(100)).await;
}

/// Send a request with an optional JSON body and return the response.
pub async fn send_json(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<&serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send_json(app, "POST", uri, Some(body)).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send_json(app, "GET", uri, None).await
}
