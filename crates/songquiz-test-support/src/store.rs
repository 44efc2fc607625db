//! Test stores — mock `PersistenceStore` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use songquiz_core::error::GameError;
use songquiz_core::ids::{PlayerId, RoomId};
use songquiz_core::ports::{
    PersistenceStore, PlayerProfile, RecentActivity, RoomCounter, SessionStats,
};

/// A store that records every write and serves option blobs seeded by the
/// test. Always succeeds.
#[derive(Debug, Default)]
pub struct RecordingStore {
    sessions: Mutex<Vec<SessionStats>>,
    counters: Mutex<Vec<(RoomId, RoomCounter)>>,
    touches: Mutex<Vec<(RoomId, DateTime<Utc>)>>,
    players: Mutex<HashMap<PlayerId, PlayerProfile>>,
    options: Mutex<HashMap<RoomId, serde_json::Value>>,
    saved_options: Mutex<Vec<(RoomId, serde_json::Value)>>,
}

impl RecordingStore {
    /// Create an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `blob` as the room's options without recording a save.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seed_options(&self, room_id: &RoomId, blob: serde_json::Value) {
        self.options.lock().unwrap().insert(room_id.clone(), blob);
    }

    /// Returns every recorded session.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn recorded_sessions(&self) -> Vec<SessionStats> {
        self.sessions.lock().unwrap().clone()
    }

    /// Returns every counter increment, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn counter_increments(&self) -> Vec<(RoomId, RoomCounter)> {
        self.counters.lock().unwrap().clone()
    }

    /// Returns the rooms whose activity was touched, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn touched_rooms(&self) -> Vec<RoomId> {
        self.touches
            .lock()
            .unwrap()
            .iter()
            .map(|(room, _)| room.clone())
            .collect()
    }

    /// Returns the player's counters as recorded so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn player(&self, player_id: &PlayerId) -> Option<PlayerProfile> {
        self.players.lock().unwrap().get(player_id).cloned()
    }

    fn update_player(
        &self,
        player_id: &PlayerId,
        at: DateTime<Utc>,
        apply: impl FnOnce(&mut PlayerProfile),
    ) {
        let mut players = self.players.lock().unwrap();
        let profile = players
            .entry(player_id.clone())
            .or_insert_with(|| PlayerProfile {
                player_id: player_id.clone(),
                songs_guessed: 0,
                games_played: 0,
                first_play: at,
                last_active: at,
            });
        profile.last_active = at;
        apply(profile);
    }

    /// Returns every options blob saved through the store.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_options(&self) -> Vec<(RoomId, serde_json::Value)> {
        self.saved_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceStore for RecordingStore {
    async fn record_session(&self, stats: &SessionStats) -> Result<(), GameError> {
        self.sessions.lock().unwrap().push(stats.clone());
        Ok(())
    }

    async fn increment_counter(
        &self,
        room_id: &RoomId,
        counter: RoomCounter,
    ) -> Result<(), GameError> {
        self.counters
            .lock()
            .unwrap()
            .push((room_id.clone(), counter));
        Ok(())
    }

    async fn touch_room(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), GameError> {
        self.touches.lock().unwrap().push((room_id.clone(), at));
        Ok(())
    }

    async fn record_player_guess(
        &self,
        player_id: &PlayerId,
        at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        self.update_player(player_id, at, |profile| profile.songs_guessed += 1);
        Ok(())
    }

    async fn record_player_games(
        &self,
        player_ids: &[PlayerId],
        at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        for player_id in player_ids {
            self.update_player(player_id, at, |profile| profile.games_played += 1);
        }
        Ok(())
    }

    async fn load_player_profile(
        &self,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerProfile>, GameError> {
        Ok(self.player(player_id))
    }

    async fn recent_activity(&self, since: DateTime<Utc>) -> Result<RecentActivity, GameError> {
        let sessions = self.sessions.lock().unwrap();
        let recent: Vec<&SessionStats> =
            sessions.iter().filter(|s| s.started_at > since).collect();
        let active_players = self
            .players
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.last_active > since)
            .count();
        Ok(RecentActivity {
            sessions: recent.len() as u64,
            rounds_played: recent.iter().map(|s| u64::from(s.rounds_played)).sum(),
            active_players: active_players as u64,
        })
    }

    async fn load_room_options(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<serde_json::Value>, GameError> {
        Ok(self.options.lock().unwrap().get(room_id).cloned())
    }

    async fn save_room_options(
        &self,
        room_id: &RoomId,
        blob: &serde_json::Value,
    ) -> Result<(), GameError> {
        self.options
            .lock()
            .unwrap()
            .insert(room_id.clone(), blob.clone());
        self.saved_options
            .lock()
            .unwrap()
            .push((room_id.clone(), blob.clone()));
        Ok(())
    }
}

/// A store that fails every call with a persistence error. Useful for
/// checking that storage failures never disturb a session.
#[derive(Debug)]
pub struct FailingStore;

fn refused() -> GameError {
    GameError::Persistence("connection refused".into())
}

#[async_trait]
impl PersistenceStore for FailingStore {
    async fn record_session(&self, _stats: &SessionStats) -> Result<(), GameError> {
        Err(refused())
    }

    async fn increment_counter(
        &self,
        _room_id: &RoomId,
        _counter: RoomCounter,
    ) -> Result<(), GameError> {
        Err(refused())
    }

    async fn touch_room(&self, _room_id: &RoomId, _at: DateTime<Utc>) -> Result<(), GameError> {
        Err(refused())
    }

    async fn record_player_guess(
        &self,
        _player_id: &PlayerId,
        _at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        Err(refused())
    }

    async fn record_player_games(
        &self,
        _player_ids: &[PlayerId],
        _at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        Err(refused())
    }

    async fn load_player_profile(
        &self,
        _player_id: &PlayerId,
    ) -> Result<Option<PlayerProfile>, GameError> {
        Err(refused())
    }

    async fn recent_activity(&self, _since: DateTime<Utc>) -> Result<RecentActivity, GameError> {
        Err(refused())
    }

    async fn load_room_options(
        &self,
        _room_id: &RoomId,
    ) -> Result<Option<serde_json::Value>, GameError> {
        Err(refused())
    }

    async fn save_room_options(
        &self,
        _room_id: &RoomId,
        _blob: &serde_json::Value,
    ) -> Result<(), GameError> {
        Err(refused())
    }
}

/// A store whose writes never complete. Reads succeed with nothing stored.
/// Used to check that a hung database never holds up a command.
#[derive(Debug)]
pub struct StalledStore;

#[async_trait]
impl PersistenceStore for StalledStore {
    async fn record_session(&self, _stats: &SessionStats) -> Result<(), GameError> {
        std::future::pending().await
    }

    async fn increment_counter(
        &self,
        _room_id: &RoomId,
        _counter: RoomCounter,
    ) -> Result<(), GameError> {
        std::future::pending().await
    }

    async fn touch_room(&self, _room_id: &RoomId, _at: DateTime<Utc>) -> Result<(), GameError> {
        std::future::pending().await
    }

    async fn record_player_guess(
        &self,
        _player_id: &PlayerId,
        _at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        std::future::pending().await
    }

    async fn record_player_games(
        &self,
        _player_ids: &[PlayerId],
        _at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        std::future::pending().await
    }

    async fn load_player_profile(
        &self,
        _player_id: &PlayerId,
    ) -> Result<Option<PlayerProfile>, GameError> {
        Ok(None)
    }

    async fn recent_activity(&self, _since: DateTime<Utc>) -> Result<RecentActivity, GameError> {
        Ok(RecentActivity::default())
    }

    async fn load_room_options(
        &self,
        _room_id: &RoomId,
    ) -> Result<Option<serde_json::Value>, GameError> {
        Ok(None)
    }

    async fn save_room_options(
        &self,
        _room_id: &RoomId,
        _blob: &serde_json::Value,
    ) -> Result<(), GameError> {
        std::future::pending().await
    }
}
