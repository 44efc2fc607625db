//! Query handlers for the session engine.
//!
//! Read-only views for reporting collaborators. Formatting them for a chat
//! platform is the caller's concern.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use songquiz_core::error::GameError;
use songquiz_core::ids::{PlayerId, RoomId};
use songquiz_core::options::ScoringMode;
use songquiz_core::ports::{PersistenceStore, PlayerProfile, RecentActivity};
use songquiz_scoring::Standing;
use uuid::Uuid;

use crate::application::registry::SessionRegistry;
use crate::domain::session::SessionState;

/// Read-only view of a room's scoreboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreboardView {
    /// The session identifier.
    pub session_id: Uuid,
    /// The room the session runs in.
    pub room_id: RoomId,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Scoring mode of the session.
    pub scoring_mode: ScoringMode,
    /// Goal configured at the latest round start.
    pub goal: Option<u32>,
    /// Rounds created so far.
    pub rounds_played: u32,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Players currently in first place.
    pub leaders: Vec<Standing>,
    /// Every tracked player.
    pub standings: Vec<Standing>,
}

/// How far back [`get_usage_stats`] looks for recent activity.
pub const RECENT_WINDOW: TimeDelta = TimeDelta::hours(24);

/// Process-wide usage figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// Sessions currently registered.
    pub active_sessions: usize,
    /// Players with an evaluated guess across those sessions.
    pub active_players: usize,
    /// Stored activity within [`RECENT_WINDOW`].
    pub recent: RecentActivity,
}

/// Returns the scoreboard of the room's live session.
///
/// # Errors
///
/// Returns `GameError::SessionNotFound` if the room has no session.
pub async fn get_scoreboard(
    room_id: &RoomId,
    registry: &SessionRegistry,
) -> Result<ScoreboardView, GameError> {
    let handle = registry
        .get(room_id)
        .ok_or_else(|| GameError::SessionNotFound(room_id.clone()))?;
    let session = handle.lock().await;
    let scoreboard = session.scoreboard();
    Ok(ScoreboardView {
        session_id: session.id(),
        room_id: session.room_id().clone(),
        state: session.state(),
        scoring_mode: scoreboard.mode(),
        goal: session.options().goal,
        rounds_played: session.rounds_played(),
        started_at: session.started_at(),
        leaders: scoreboard.leaders(),
        standings: scoreboard.standings(),
    })
}

/// Counts live sessions and their participants, plus the stored activity
/// of the [`RECENT_WINDOW`] before `now`.
///
/// # Errors
///
/// Returns `GameError::Persistence` if the recent figures cannot be read.
pub async fn get_usage_stats(
    registry: &SessionRegistry,
    store: &dyn PersistenceStore,
    now: DateTime<Utc>,
) -> Result<UsageStats, GameError> {
    let recent = store.recent_activity(now - RECENT_WINDOW).await?;
    let handles = registry.handles();
    let mut active_players = 0;
    for handle in &handles {
        active_players += handle.lock().await.participant_count();
    }
    Ok(UsageStats {
        active_sessions: handles.len(),
        active_players,
        recent,
    })
}

/// Returns the player's lifetime counters.
///
/// # Errors
///
/// Returns `GameError::PlayerNotFound` if the player has never played and
/// `GameError::Persistence` if the store cannot be read.
pub async fn get_player_profile(
    player_id: &PlayerId,
    store: &dyn PersistenceStore,
) -> Result<PlayerProfile, GameError> {
    store
        .load_player_profile(player_id)
        .await?
        .ok_or_else(|| GameError::PlayerNotFound(player_id.clone()))
}
