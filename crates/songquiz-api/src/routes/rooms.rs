//! Routes for per-room sessions.
//!
//! Every command carries a fresh correlation id; the room id comes from the
//! path.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use songquiz_core::ids::{Player, RoomId};
use songquiz_core::options::{GuessMode, RoomOptions};
use songquiz_core::ports::{PlaybackOutcome, SessionStats};
use songquiz_session::application::command_handlers::{GuessVerdict, RoundStartAccepted};
use songquiz_session::application::query_handlers::{self, ScoreboardView};
use songquiz_session::domain::commands;
use songquiz_session::domain::session::RoundEndReason;

use crate::bridge::NowPlaying;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /{room_id}/rounds.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRoundRequest {
    /// Voice channel the requester is in. Announced before connecting.
    pub voice_channel_id: Option<String>,
    /// Players present in the voice channel.
    pub roster: Vec<Player>,
}

/// Request body for POST /{room_id}/guesses.
#[derive(Debug, Deserialize)]
pub struct SubmitGuessRequest {
    /// Author of the message.
    pub player: Player,
    /// Message text.
    pub text: String,
    /// Overrides the room's guess mode.
    #[serde(default)]
    pub mode: Option<GuessMode>,
}

/// Request body for POST /{room_id}/end-round.
#[derive(Debug, Deserialize)]
pub struct EndRoundRequest {
    /// `skipped` or `stopped`.
    pub reason: RoundEndReason,
}

/// Response body for POST /{room_id}/end-round.
#[derive(Debug, Serialize)]
pub struct EndRoundResponse {
    /// Whether a round was ended.
    pub ended: bool,
}

/// Request body for POST /{room_id}/voice.
#[derive(Debug, Deserialize)]
pub struct VoicePresenceRequest {
    /// Voice channel the session plays into, when it changed.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Human members left in the channel.
    pub humans_remaining: u32,
}

/// Response body for POST /{room_id}/voice.
#[derive(Debug, Serialize)]
pub struct VoicePresenceResponse {
    /// Final statistics when the update ended the session.
    pub session_ended: Option<SessionStats>,
}

/// Request body for POST /{room_id}/playback.
#[derive(Debug, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum PlaybackReport {
    /// The track played to its end.
    Finished,
    /// Playback failed.
    Error {
        /// What went wrong.
        #[serde(default)]
        message: String,
    },
    /// The bot was removed from the voice channel.
    Disconnected,
}

impl From<PlaybackReport> for PlaybackOutcome {
    fn from(report: PlaybackReport) -> Self {
        match report {
            PlaybackReport::Finished => Self::Finished,
            PlaybackReport::Error { message } => Self::Fault(message),
            PlaybackReport::Disconnected => Self::Disconnected,
        }
    }
}

/// Response body for POST /{room_id}/playback.
#[derive(Debug, Serialize)]
pub struct PlaybackReportResponse {
    /// Whether a pending playback received the signal.
    pub delivered: bool,
}

/// POST /{room_id}/rounds
#[instrument(skip(state, request), fields(room_id = %room_id))]
async fn start_round(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<StartRoundRequest>,
) -> Result<Json<RoundStartAccepted>, ApiError> {
    let room_id = RoomId::new(room_id);
    if let Some(channel_id) = request.voice_channel_id {
        state.voice.announce(&room_id, channel_id);
    }
    let command = commands::StartRound {
        correlation_id: Uuid::new_v4(),
        room_id,
        roster: request.roster,
    };

    info!(correlation_id = %command.correlation_id, "handling start_round command");

    let accepted = state.engine.handle_start_round(&command).await?;
    Ok(Json(accepted))
}

/// POST /{room_id}/guesses
#[instrument(skip(state, request), fields(room_id = %room_id, player_id = %request.player.id))]
async fn submit_guess(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<SubmitGuessRequest>,
) -> Result<Json<GuessVerdict>, ApiError> {
    let command = commands::SubmitGuess {
        correlation_id: Uuid::new_v4(),
        room_id: RoomId::new(room_id),
        player: request.player,
        text: request.text,
        mode: request.mode,
    };

    let verdict = state.engine.handle_submit_guess(&command).await?;
    Ok(Json(verdict))
}

/// POST /{room_id}/end-round
#[instrument(skip(state, request), fields(room_id = %room_id, reason = ?request.reason))]
async fn end_round(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<EndRoundRequest>,
) -> Result<Json<EndRoundResponse>, ApiError> {
    let command = commands::EndRound {
        correlation_id: Uuid::new_v4(),
        room_id: RoomId::new(room_id),
        reason: request.reason,
    };

    info!(correlation_id = %command.correlation_id, "handling end_round command");

    let ended = state.engine.handle_end_round(&command).await?;
    Ok(Json(EndRoundResponse { ended }))
}

/// POST /{room_id}/end-session
#[instrument(skip(state), fields(room_id = %room_id))]
async fn end_session(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    let command = commands::EndSession {
        correlation_id: Uuid::new_v4(),
        room_id: RoomId::new(room_id),
    };

    info!(correlation_id = %command.correlation_id, "handling end_session command");

    let stats = state.engine.handle_end_session(&command).await?;
    Ok(Json(stats))
}

/// POST /{room_id}/voice
#[instrument(skip(state, request), fields(room_id = %room_id, humans = request.humans_remaining))]
async fn voice_presence(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<VoicePresenceRequest>,
) -> Result<Json<VoicePresenceResponse>, ApiError> {
    let room_id = RoomId::new(room_id);
    if let Some(channel_id) = request.channel_id {
        state.voice.announce(&room_id, channel_id);
    }
    let command = commands::UpdateVoicePresence {
        correlation_id: Uuid::new_v4(),
        room_id,
        humans_remaining: request.humans_remaining,
    };

    let session_ended = state.engine.handle_voice_presence(&command).await?;
    Ok(Json(VoicePresenceResponse { session_ended }))
}

/// GET /{room_id}/playback
async fn now_playing(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<Option<NowPlaying>> {
    Json(state.media.now_playing(&RoomId::new(room_id)))
}

/// POST /{room_id}/playback
#[instrument(skip(state, report), fields(room_id = %room_id))]
async fn report_playback(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(report): Json<PlaybackReport>,
) -> Json<PlaybackReportResponse> {
    let delivered = state.media.report(&RoomId::new(room_id), report.into());
    Json(PlaybackReportResponse { delivered })
}

/// GET /{room_id}/scoreboard
async fn scoreboard(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<ScoreboardView>, ApiError> {
    let view =
        query_handlers::get_scoreboard(&RoomId::new(room_id), state.engine.registry()).await?;
    Ok(Json(view))
}

/// GET /{room_id}/options
async fn get_options(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<RoomOptions> {
    Json(state.engine.options().get(&RoomId::new(room_id)).await)
}

/// PUT /{room_id}/options
#[instrument(skip(state, options), fields(room_id = %room_id))]
async fn put_options(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(options): Json<RoomOptions>,
) -> Result<Json<RoomOptions>, ApiError> {
    let saved = state
        .engine
        .options()
        .update(&RoomId::new(room_id), options)
        .await?;
    info!("room options updated");
    Ok(Json(saved))
}

/// Returns the router for per-room sessions.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{room_id}/rounds", post(start_round))
        .route("/{room_id}/guesses", post(submit_guess))
        .route("/{room_id}/end-round", post(end_round))
        .route("/{room_id}/end-session", post(end_session))
        .route("/{room_id}/voice", post(voice_presence))
        .route("/{room_id}/playback", get(now_playing).post(report_playback))
        .route("/{room_id}/scoreboard", get(scoreboard))
        .route("/{room_id}/options", get(get_options).put(put_options))
}
