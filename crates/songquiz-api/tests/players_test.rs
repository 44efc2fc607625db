//! Integration tests for player profiles and recent usage.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{get_json, post_json, send_json, settle};

#[tokio::test(start_paused = true)]
async fn test_profile_and_recent_stats_after_a_game() {
    // Arrange
    let (app, _, _) = common::build_test_app();
    post_json(
        app.clone(),
        "/api/v1/rooms/guild-1/rounds",
        &json!({ "voice_channel_id": "voice-7" }),
    )
    .await;
    settle().await;
    let wendy = json!({ "id": "u1", "display_name": "Wendy#0001", "avatar_ref": "https://cdn/u1.png" });
    post_json(
        app.clone(),
        "/api/v1/rooms/guild-1/guesses",
        &json!({ "player": wendy, "text": "psycho" }),
    )
    .await;
    settle().await;
    send_json(app.clone(), "POST", "/api/v1/rooms/guild-1/end-session", None).await;

    // Act
    let (profile_status, profile) = get_json(app.clone(), "/api/v1/players/u1/profile").await;
    let (stats_status, stats) = get_json(app, "/api/v1/stats").await;

    // Assert
    assert_eq!(profile_status, StatusCode::OK);
    assert_eq!(profile["player_id"], "u1");
    assert_eq!(profile["songs_guessed"], 1);
    assert_eq!(profile["games_played"], 1);
    assert_eq!(stats_status, StatusCode::OK);
    assert_eq!(stats["active_sessions"], 0);
    assert_eq!(stats["recent"]["sessions"], 1);
    assert_eq!(stats["recent"]["rounds_played"], 2);
    assert_eq!(stats["recent"]["active_players"], 1);
}

#[tokio::test]
async fn test_profile_of_unknown_player_returns_404() {
    let (app, _, _) = common::build_test_app();

    let (status, json) = get_json(app, "/api/v1/players/u9/profile").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "player_not_found");
}
