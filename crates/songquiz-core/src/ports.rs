//! Collaborator ports consumed by the session engine.
//!
//! Chat delivery, voice transport, catalog queries and SQL live behind these
//! traits; the engine only sees the narrow operations below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::GameError;
use crate::ids::{PlayerId, RoomId};
use crate::options::SongFilter;

/// A song picked for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSong {
    /// Primary answer (song title).
    pub name: String,
    /// Performing artist.
    pub artist: String,
    /// Reference the media player understands (e.g. a video id).
    pub media_ref: String,
    /// Additional accepted answers.
    pub aliases: Vec<String>,
}

/// Picks songs from the catalog.
#[async_trait]
pub trait SongSelector: Send + Sync {
    /// Selects a random song matching `filter`, or `None` when nothing
    /// matches.
    async fn select_random_song(
        &self,
        filter: &SongFilter,
    ) -> Result<Option<SelectedSong>, GameError>;
}

/// A live voice connection for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    /// The room the connection belongs to.
    pub room_id: RoomId,
    /// The voice channel joined.
    pub channel_id: String,
}

/// Joins and leaves voice channels.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Returns a connection for the room, joining its voice channel if needed.
    async fn ensure_connection(&self, room_id: &RoomId) -> Result<ConnectionHandle, GameError>;

    /// Leaves the room's voice channel. Best effort.
    async fn disconnect(&self, room_id: &RoomId);
}

/// Terminal lifecycle signal of one playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The track played to its end.
    Finished,
    /// Playback failed; the message describes the fault.
    Fault(String),
    /// The voice connection was lost (e.g. the bot was removed from the channel).
    Disconnected,
}

/// Resolves once with the outcome of a playback.
pub type PlaybackSignal = oneshot::Receiver<PlaybackOutcome>;

/// Streams audio into a voice connection.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Starts playing `media_ref` at `seek_seconds`, replacing anything
    /// already playing on the connection.
    async fn play(
        &self,
        connection: &ConnectionHandle,
        media_ref: &str,
        seek_seconds: f64,
    ) -> Result<PlaybackSignal, GameError>;

    /// Stops playback in the room. Best effort.
    async fn stop(&self, room_id: &RoomId);

    /// Length of the track in seconds.
    async fn duration_seconds(&self, media_ref: &str) -> Result<f64, GameError>;
}

/// Per-room counters kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomCounter {
    /// Sessions that reached their end.
    GamesPlayed,
    /// Rounds resolved by a correct guess.
    SongsGuessed,
}

impl RoomCounter {
    /// Column name backing this counter.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::GamesPlayed => "games_played",
            Self::SongsGuessed => "songs_guessed",
        }
    }
}

/// Final statistics snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier.
    pub session_id: Uuid,
    /// Room the session ran in.
    pub room_id: RoomId,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// Rounds created over the session.
    pub rounds_played: u32,
    /// Distinct players who guessed.
    pub participant_count: u32,
    /// Mean time from playback start to correct guess, in seconds. `None`
    /// when nobody guessed correctly.
    pub average_guess_seconds: Option<f64>,
    /// Session duration in minutes.
    pub session_length_minutes: f64,
}

/// Lifetime counters of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// The player.
    pub player_id: PlayerId,
    /// Rounds the player resolved with a correct guess.
    pub songs_guessed: u64,
    /// Sessions the player took part in.
    pub games_played: u64,
    /// First recorded activity.
    pub first_play: DateTime<Utc>,
    /// Latest recorded activity.
    pub last_active: DateTime<Utc>,
}

/// Activity recorded since some instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentActivity {
    /// Sessions that started in the window.
    pub sessions: u64,
    /// Rounds played by those sessions.
    pub rounds_played: u64,
    /// Players active in the window.
    pub active_players: u64,
}

/// Statistics and options storage.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Appends a finished session's statistics.
    async fn record_session(&self, stats: &SessionStats) -> Result<(), GameError>;

    /// Increments a per-room counter by one.
    async fn increment_counter(&self, room_id: &RoomId, counter: RoomCounter)
    -> Result<(), GameError>;

    /// Records activity in the room.
    async fn touch_room(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), GameError>;

    /// Counts a correct guess for the player and marks them active at `at`.
    async fn record_player_guess(
        &self,
        player_id: &PlayerId,
        at: DateTime<Utc>,
    ) -> Result<(), GameError>;

    /// Counts a finished session for each player and marks them active at
    /// `at`.
    async fn record_player_games(
        &self,
        player_ids: &[PlayerId],
        at: DateTime<Utc>,
    ) -> Result<(), GameError>;

    /// Loads the player's lifetime counters, if they have ever played.
    async fn load_player_profile(
        &self,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerProfile>, GameError>;

    /// Summarizes sessions started and players active after `since`.
    async fn recent_activity(&self, since: DateTime<Utc>) -> Result<RecentActivity, GameError>;

    /// Loads the room's stored options blob, if any.
    async fn load_room_options(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<serde_json::Value>, GameError>;

    /// Replaces the room's stored options blob.
    async fn save_room_options(
        &self,
        room_id: &RoomId,
        blob: &serde_json::Value,
    ) -> Result<(), GameError>;
}
