//! Outbound game events.
//!
//! Reporting collaborators (chat message formatting, dashboards) subscribe to
//! these; the engine never formats output itself.

use serde::{Deserialize, Serialize};
use songquiz_core::event::{DomainEvent, EventMetadata};
use songquiz_core::ids::{Player, RoomId};
use songquiz_core::options::ScoringMode;
use songquiz_core::ports::SessionStats;

use super::session::{RoundEndReason, SessionEndReason};

/// Emitted when a room's session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCreated {
    /// Scoring mode fixed for the session's lifetime.
    pub scoring_mode: ScoringMode,
}

/// Emitted when audio starts for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStarted {
    /// 1-based round number within the session.
    pub round_number: u32,
    /// Media being played.
    pub media_ref: String,
    /// Playback offset in seconds.
    pub seek_seconds: f64,
}

/// Emitted when a round start is abandoned before playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundAborted {
    /// Human-readable cause.
    pub reason: String,
}

/// Emitted when a guess resolves the round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessResolved {
    /// The winning guesser.
    pub player: Player,
    /// The song title.
    pub answer: String,
    /// The performing artist.
    pub artist: String,
    /// Seconds from playback start to the guess.
    pub guess_seconds: f64,
}

/// Emitted when an elimination player runs out of lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEliminated {
    /// The eliminated player.
    pub player: Player,
}

/// Emitted when a round ends for any reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEnded {
    /// Why the round ended.
    pub reason: RoundEndReason,
    /// The song title, if a song had been chosen.
    pub answer: Option<String>,
    /// The artist, if a song had been chosen.
    pub artist: Option<String>,
}

/// Emitted once when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnded {
    /// Why the session ended.
    pub reason: SessionEndReason,
    /// Final statistics.
    pub stats: SessionStats,
}

/// Event type identifier for [`SessionCreated`].
pub const SESSION_CREATED_EVENT_TYPE: &str = "session.session_created";

/// Event type identifier for [`RoundStarted`].
pub const ROUND_STARTED_EVENT_TYPE: &str = "session.round_started";

/// Event type identifier for [`RoundAborted`].
pub const ROUND_ABORTED_EVENT_TYPE: &str = "session.round_aborted";

/// Event type identifier for [`GuessResolved`].
pub const GUESS_RESOLVED_EVENT_TYPE: &str = "session.guess_resolved";

/// Event type identifier for [`PlayerEliminated`].
pub const PLAYER_ELIMINATED_EVENT_TYPE: &str = "session.player_eliminated";

/// Event type identifier for [`RoundEnded`].
pub const ROUND_ENDED_EVENT_TYPE: &str = "session.round_ended";

/// Event type identifier for [`SessionEnded`].
pub const SESSION_ENDED_EVENT_TYPE: &str = "session.session_ended";

/// Event payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEventKind {
    /// A session was created.
    SessionCreated(SessionCreated),
    /// A round began playing.
    RoundStarted(RoundStarted),
    /// A round start was abandoned.
    RoundAborted(RoundAborted),
    /// A guess resolved the round.
    GuessResolved(GuessResolved),
    /// A player was eliminated.
    PlayerEliminated(PlayerEliminated),
    /// A round ended.
    RoundEnded(RoundEnded),
    /// The session ended.
    SessionEnded(SessionEnded),
}

impl GameEventKind {
    /// The event type identifier for this payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionCreated(_) => SESSION_CREATED_EVENT_TYPE,
            Self::RoundStarted(_) => ROUND_STARTED_EVENT_TYPE,
            Self::RoundAborted(_) => ROUND_ABORTED_EVENT_TYPE,
            Self::GuessResolved(_) => GUESS_RESOLVED_EVENT_TYPE,
            Self::PlayerEliminated(_) => PLAYER_ELIMINATED_EVENT_TYPE,
            Self::RoundEnded(_) => ROUND_ENDED_EVENT_TYPE,
            Self::SessionEnded(_) => SESSION_ENDED_EVENT_TYPE,
        }
    }
}

/// Event envelope published by a session.
#[derive(Debug, Clone)]
pub struct GameEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// The room the session runs in.
    pub room_id: RoomId,
    /// Event-specific payload.
    pub kind: GameEventKind,
}

impl DomainEvent for GameEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or(serde_json::Value::Null)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
