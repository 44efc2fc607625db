//! Scripted media player.
//!
//! Each successful `play` hands back a fresh playback signal; the test
//! resolves the most recent one through [`ScriptedMediaPlayer::emit`].

use std::sync::Mutex;

use async_trait::async_trait;
use songquiz_core::error::GameError;
use songquiz_core::ids::RoomId;
use songquiz_core::ports::{ConnectionHandle, MediaPlayer, PlaybackOutcome, PlaybackSignal};
use tokio::sync::oneshot;

/// One recorded `play` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRecord {
    /// Media reference played.
    pub media_ref: String,
    /// Offset playback started at.
    pub seek_seconds: f64,
}

#[derive(Debug, Default)]
struct PlayerState {
    plays: Vec<PlayRecord>,
    pending: Option<oneshot::Sender<PlaybackOutcome>>,
    stops: usize,
    failures_left: usize,
}

/// A media player that records calls and lets the test drive playback
/// outcomes.
#[derive(Debug, Default)]
pub struct ScriptedMediaPlayer {
    state: Mutex<PlayerState>,
    duration: Option<f64>,
}

impl ScriptedMediaPlayer {
    /// A player whose plays succeed and whose durations are unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `seconds` as the duration of every track.
    #[must_use]
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Fails the next `count` plays. Failed plays are not recorded.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn failing_plays(self, count: usize) -> Self {
        self.state.lock().unwrap().failures_left = count;
        self
    }

    /// Successful plays so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn plays(&self) -> Vec<PlayRecord> {
        self.state.lock().unwrap().plays.clone()
    }

    /// Number of `stop` calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    /// Resolves the latest playback with `outcome`. Returns `false` when no
    /// playback is pending or its watcher has gone away.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn emit(&self, outcome: PlaybackOutcome) -> bool {
        match self.state.lock().unwrap().pending.take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl MediaPlayer for ScriptedMediaPlayer {
    async fn play(
        &self,
        _connection: &ConnectionHandle,
        media_ref: &str,
        seek_seconds: f64,
    ) -> Result<PlaybackSignal, GameError> {
        let mut state = self.state.lock().unwrap();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(GameError::StreamFault("stream unavailable".into()));
        }
        let (tx, rx) = oneshot::channel();
        state.plays.push(PlayRecord {
            media_ref: media_ref.to_owned(),
            seek_seconds,
        });
        state.pending = Some(tx);
        Ok(rx)
    }

    async fn stop(&self, _room_id: &RoomId) {
        self.state.lock().unwrap().stops += 1;
    }

    async fn duration_seconds(&self, media_ref: &str) -> Result<f64, GameError> {
        self.duration
            .ok_or_else(|| GameError::StreamFault(format!("no duration for {media_ref}")))
    }
}
