//! Bridge-backed voice and media adapters.
//!
//! The chat-platform bridge owns the actual voice transport. It announces
//! which voice channel a room plays into, polls for what to play, and
//! reports how each playback ended. These adapters hold that shared state
//! for the engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info};

use songquiz_core::error::GameError;
use songquiz_core::ids::RoomId;
use songquiz_core::ports::{
    ConnectionHandle, MediaPlayer, PlaybackOutcome, PlaybackSignal, VoiceConnector,
};

/// Voice channels announced by the bridge, keyed by room.
#[derive(Debug, Default)]
pub struct BridgeVoiceConnector {
    channels: DashMap<RoomId, String>,
}

impl BridgeVoiceConnector {
    /// Creates a connector with no announced channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the voice channel the room plays into.
    pub fn announce(&self, room_id: &RoomId, channel_id: impl Into<String>) {
        self.channels.insert(room_id.clone(), channel_id.into());
    }

    /// The channel currently announced for the room.
    #[must_use]
    pub fn channel(&self, room_id: &RoomId) -> Option<String> {
        self.channels.get(room_id).map(|c| c.value().clone())
    }
}

#[async_trait]
impl VoiceConnector for BridgeVoiceConnector {
    async fn ensure_connection(&self, room_id: &RoomId) -> Result<ConnectionHandle, GameError> {
        let channel_id = self.channel(room_id).ok_or_else(|| {
            GameError::Connection(format!("no voice channel announced for room {room_id}"))
        })?;
        Ok(ConnectionHandle {
            room_id: room_id.clone(),
            channel_id,
        })
    }

    async fn disconnect(&self, room_id: &RoomId) {
        if self.channels.remove(room_id).is_some() {
            info!(%room_id, "left voice channel");
        }
    }
}

/// What the bridge should be streaming into a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    /// Voice channel to stream into.
    pub channel_id: String,
    /// Media reference to stream.
    pub media_ref: String,
    /// Offset to start at.
    pub seek_seconds: f64,
}

/// Most track durations kept at once.
pub const MAX_KNOWN_DURATIONS: usize = 1024;

#[derive(Debug)]
struct Playback {
    now_playing: NowPlaying,
    signal: oneshot::Sender<PlaybackOutcome>,
}

/// Recently reported durations. The oldest report is evicted once
/// `capacity` tracks are known.
#[derive(Debug)]
struct Durations {
    capacity: usize,
    seconds: HashMap<String, f64>,
    order: VecDeque<String>,
}

impl Durations {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seconds: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, media_ref: String, seconds: f64) {
        if self.seconds.insert(media_ref.clone(), seconds).is_some() {
            return;
        }
        self.order.push_back(media_ref);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seconds.remove(&oldest);
            }
        }
    }

    fn get(&self, media_ref: &str) -> Option<f64> {
        self.seconds.get(media_ref).copied()
    }
}

/// Pending playbacks and known track durations.
#[derive(Debug)]
pub struct BridgeMediaPlayer {
    playing: DashMap<RoomId, Playback>,
    durations: Mutex<Durations>,
}

impl Default for BridgeMediaPlayer {
    fn default() -> Self {
        Self::with_duration_capacity(MAX_KNOWN_DURATIONS)
    }
}

impl BridgeMediaPlayer {
    /// Creates a player with nothing playing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a player that remembers at most `capacity` track durations.
    #[must_use]
    pub fn with_duration_capacity(capacity: usize) -> Self {
        Self {
            playing: DashMap::new(),
            durations: Mutex::new(Durations::new(capacity)),
        }
    }

    /// The playback pending in the room, if any.
    #[must_use]
    pub fn now_playing(&self, room_id: &RoomId) -> Option<NowPlaying> {
        self.playing.get(room_id).map(|p| p.now_playing.clone())
    }

    /// Resolves the room's pending playback with `outcome`. Returns `false`
    /// when nothing was playing or the engine had stopped listening.
    pub fn report(&self, room_id: &RoomId, outcome: PlaybackOutcome) -> bool {
        let Some((_, playback)) = self.playing.remove(room_id) else {
            return false;
        };
        debug!(%room_id, media_ref = %playback.now_playing.media_ref, ?outcome, "playback reported");
        playback.signal.send(outcome).is_ok()
    }

    /// Records the length of a track.
    pub fn record_duration(&self, media_ref: impl Into<String>, seconds: f64) {
        self.durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(media_ref.into(), seconds);
    }
}

#[async_trait]
impl MediaPlayer for BridgeMediaPlayer {
    async fn play(
        &self,
        connection: &ConnectionHandle,
        media_ref: &str,
        seek_seconds: f64,
    ) -> Result<PlaybackSignal, GameError> {
        let (signal, receiver) = oneshot::channel();
        let playback = Playback {
            now_playing: NowPlaying {
                channel_id: connection.channel_id.clone(),
                media_ref: media_ref.to_owned(),
                seek_seconds,
            },
            signal,
        };
        self.playing.insert(connection.room_id.clone(), playback);
        Ok(receiver)
    }

    async fn stop(&self, room_id: &RoomId) {
        self.playing.remove(room_id);
    }

    async fn duration_seconds(&self, media_ref: &str) -> Result<f64, GameError> {
        self.durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(media_ref)
            .ok_or_else(|| GameError::StreamFault(format!("duration of {media_ref} is unknown")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::new("guild-1")
    }

    #[tokio::test]
    async fn test_ensure_connection_fails_without_announced_channel() {
        // Arrange
        let voice = BridgeVoiceConnector::new();

        // Act
        let result = voice.ensure_connection(&room()).await;

        // Assert
        assert!(matches!(result, Err(GameError::Connection(_))));
    }

    #[tokio::test]
    async fn test_disconnect_forgets_channel() {
        // Arrange
        let voice = BridgeVoiceConnector::new();
        voice.announce(&room(), "voice-7");
        let handle = voice.ensure_connection(&room()).await.unwrap();

        // Act
        voice.disconnect(&room()).await;

        // Assert
        assert_eq!(handle.channel_id, "voice-7");
        assert!(voice.channel(&room()).is_none());
    }

    #[tokio::test]
    async fn test_report_resolves_pending_playback() {
        // Arrange
        let media = BridgeMediaPlayer::new();
        let connection = ConnectionHandle {
            room_id: room(),
            channel_id: "voice-7".to_owned(),
        };
        let signal = media.play(&connection, "psycho-ref", 12.0).await.unwrap();
        let playing = media.now_playing(&room()).unwrap();

        // Act
        let delivered = media.report(&room(), PlaybackOutcome::Finished);

        // Assert
        assert!(delivered);
        assert_eq!(playing.media_ref, "psycho-ref");
        assert_eq!(signal.await.unwrap(), PlaybackOutcome::Finished);
        assert!(media.now_playing(&room()).is_none());
    }

    #[tokio::test]
    async fn test_new_play_replaces_previous_playback() {
        // Arrange
        let media = BridgeMediaPlayer::new();
        let connection = ConnectionHandle {
            room_id: room(),
            channel_id: "voice-7".to_owned(),
        };
        let first = media.play(&connection, "psycho-ref", 0.0).await.unwrap();

        // Act
        let _second = media.play(&connection, "fire-ref", 0.0).await.unwrap();

        // Assert
        assert!(first.await.is_err());
        assert_eq!(media.now_playing(&room()).unwrap().media_ref, "fire-ref");
    }

    #[tokio::test]
    async fn test_duration_known_only_after_recorded() {
        // Arrange
        let media = BridgeMediaPlayer::new();

        // Act
        let before = media.duration_seconds("psycho-ref").await;
        media.record_duration("psycho-ref", 210.0);
        let after = media.duration_seconds("psycho-ref").await.unwrap();

        // Assert
        assert!(before.is_err());
        assert!((after - 210.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_oldest_duration_is_evicted_at_capacity() {
        // Arrange
        let media = BridgeMediaPlayer::with_duration_capacity(2);
        media.record_duration("psycho-ref", 210.0);
        media.record_duration("fire-ref", 180.0);

        // Act
        media.record_duration("fire-ref", 181.0);
        media.record_duration("lion-ref", 200.0);

        // Assert
        assert!(media.duration_seconds("psycho-ref").await.is_err());
        assert!((media.duration_seconds("fire-ref").await.unwrap() - 181.0).abs() < f64::EPSILON);
        assert!(media.duration_seconds("lion-ref").await.is_ok());
    }

    #[test]
    fn test_report_without_playback_is_not_delivered() {
        let media = BridgeMediaPlayer::new();

        assert!(!media.report(&room(), PlaybackOutcome::Disconnected));
    }
}
