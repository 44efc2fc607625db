//! Command handlers for the session engine.
//!
//! [`GameEngine`] drives sessions through the asynchronous parts of a round:
//! song selection, voice connection, the settle delay, playback and the guess
//! timer. Every wait happens with the session unlocked, and every
//! continuation re-locks and checks that its attempt is still current before
//! acting. Round resolution itself is decided by the session under its lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use songquiz_core::clock::Clock;
use songquiz_core::error::GameError;
use songquiz_core::ids::{PlayerId, RoomId};
use songquiz_core::options::SeekType;
use songquiz_core::ports::{
    ConnectionHandle, MediaPlayer, PersistenceStore, PlaybackOutcome, PlaybackSignal,
    RoomCounter, SessionStats, SongSelector, VoiceConnector,
};
use songquiz_core::rng::DeterministicRng;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::options::RoomOptionsCache;
use crate::application::registry::{SessionHandle, SessionRegistry};
use crate::domain::commands::{EndRound, EndSession, StartRound, SubmitGuess, UpdateVoicePresence};
use crate::domain::events::GameEvent;
use crate::domain::session::{
    GuessOutcome, NextStep, RoundEndReason, RoundRules, Session, SessionEndReason, SessionState,
};

/// Share of the track length a random seek may skip.
const RANDOM_SEEK_FRACTION: f64 = 0.6;

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Pause between preparing a round and starting playback, during which a
    /// stop request can still cancel the round.
    pub settle_delay: Duration,
    /// Scoring and fault rules for new sessions.
    pub rules: RoundRules,
    /// Buffer size of the outbound event channel.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            rules: RoundRules::default(),
            event_capacity: 256,
        }
    }
}

/// External collaborators the engine drives.
pub struct Collaborators {
    /// Song catalog.
    pub songs: Arc<dyn SongSelector>,
    /// Voice channel access.
    pub voice: Arc<dyn VoiceConnector>,
    /// Audio playback.
    pub media: Arc<dyn MediaPlayer>,
    /// Statistics storage.
    pub store: Arc<dyn PersistenceStore>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Random source for seek offsets.
    pub rng: Box<dyn DeterministicRng>,
}

/// Accepted round-start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundStartAccepted {
    /// The room's session.
    pub session_id: Uuid,
    /// Whether this request created the session.
    pub session_created: bool,
}

/// Answer to a submitted guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuessVerdict {
    /// Whether the guess resolved the round.
    pub correct: bool,
}

/// Runs every room's session. Cheap to clone.
#[derive(Clone)]
pub struct GameEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: SessionRegistry,
    options: Arc<RoomOptionsCache>,
    songs: Arc<dyn SongSelector>,
    voice: Arc<dyn VoiceConnector>,
    media: Arc<dyn MediaPlayer>,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn DeterministicRng>>,
    settings: EngineSettings,
    events: broadcast::Sender<GameEvent>,
}

impl fmt::Debug for GameEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameEngine")
            .field("sessions", &self.inner.registry.len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl GameEngine {
    /// Creates an engine with an empty registry.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        options: Arc<RoomOptionsCache>,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            inner: Arc::new(EngineInner {
                registry: SessionRegistry::new(),
                options,
                songs: collaborators.songs,
                voice: collaborators.voice,
                media: collaborators.media,
                store: collaborators.store,
                clock: collaborators.clock,
                rng: Mutex::new(collaborators.rng),
                settings,
                events,
            }),
        }
    }

    /// Subscribes to outbound game events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.inner.events.subscribe()
    }

    /// The live sessions.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// The room options cache.
    #[must_use]
    pub fn options(&self) -> &RoomOptionsCache {
        &self.inner.options
    }

    /// The statistics store.
    #[must_use]
    pub fn store(&self) -> &dyn PersistenceStore {
        self.inner.store.as_ref()
    }

    /// The engine's time source.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    /// Handles `StartRound`: creates the room's session if needed, selects a
    /// song and joins voice, then schedules playback after the settle delay.
    ///
    /// # Errors
    ///
    /// Returns `GameError::AlreadyInSession` if a round is starting or
    /// playing, `GameError::SongQuery` if no song could be selected (the
    /// session stays alive), and `GameError::Connection` if voice could not
    /// be joined (the session ends).
    #[instrument(skip(self, command), fields(room_id = %command.room_id, correlation_id = %command.correlation_id))]
    pub async fn handle_start_round(
        &self,
        command: &StartRound,
    ) -> Result<RoundStartAccepted, GameError> {
        let options = self.inner.options.get(&command.room_id).await;
        let (handle, session_created) = self.inner.registry.get_or_create(&command.room_id, || {
            Session::new(
                Uuid::new_v4(),
                command.room_id.clone(),
                options,
                self.inner.settings.rules,
                command.correlation_id,
                self.inner.clock.as_ref(),
            )
        });
        if session_created {
            info!(session_id = %handle.id(), "session created");
        }

        let attempt = {
            let mut session = handle.lock().await;
            let attempt = session.begin_round_start(&command.roster);
            self.publish(&mut session);
            attempt?
        };

        self.prepare_round(&handle, attempt, command.correlation_id)
            .await?;
        Ok(RoundStartAccepted {
            session_id: handle.id(),
            session_created,
        })
    }

    /// Handles `SubmitGuess`.
    ///
    /// # Errors
    ///
    /// Returns `GameError::SessionNotFound` if the room has no session.
    #[instrument(skip(self, command), fields(room_id = %command.room_id, player_id = %command.player.id))]
    pub async fn handle_submit_guess(
        &self,
        command: &SubmitGuess,
    ) -> Result<GuessVerdict, GameError> {
        let handle = self.session(&command.room_id)?;
        let mut session = handle.lock().await;
        let outcome = session.submit_guess(
            &command.player,
            &command.text,
            command.mode,
            command.correlation_id,
            self.inner.clock.as_ref(),
        );
        let GuessOutcome::Correct { next } = outcome else {
            return Ok(GuessVerdict { correct: false });
        };

        info!(round = session.rounds_played(), "song correctly guessed");
        self.spawn_guess_writes(command.room_id.clone(), command.player.id.clone());
        self.follow_up(&handle, session, next, command.correlation_id)
            .await;
        Ok(GuessVerdict { correct: true })
    }

    /// Handles `EndRound`. Returns whether a round was ended.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` for a reason that cannot be requested
    /// and `GameError::SessionNotFound` if the room has no session.
    #[instrument(skip(self, command), fields(room_id = %command.room_id, reason = ?command.reason))]
    pub async fn handle_end_round(&self, command: &EndRound) -> Result<bool, GameError> {
        if !command.reason.is_requestable() {
            return Err(GameError::Validation(format!(
                "round end reason {:?} cannot be requested",
                command.reason
            )));
        }
        let handle = self.session(&command.room_id)?;
        let mut session = handle.lock().await;
        let Some(next) = session.end_round(
            None,
            command.reason,
            command.correlation_id,
            self.inner.clock.as_ref(),
        ) else {
            return Ok(false);
        };
        self.follow_up(&handle, session, next, command.correlation_id)
            .await;
        Ok(true)
    }

    /// Handles `EndSession` and returns the final statistics.
    ///
    /// # Errors
    ///
    /// Returns `GameError::SessionNotFound` if the room has no session and
    /// `GameError::SessionEnded` if it is already ending.
    #[instrument(skip(self, command), fields(room_id = %command.room_id))]
    pub async fn handle_end_session(&self, command: &EndSession) -> Result<SessionStats, GameError> {
        let handle = self.session(&command.room_id)?;
        let session = handle.lock().await;
        self.conclude(
            &handle,
            session,
            SessionEndReason::Requested,
            command.correlation_id,
        )
        .await
        .ok_or_else(|| GameError::SessionEnded(command.room_id.clone()))
    }

    /// Handles `UpdateVoicePresence`. Ends the session when no human is left
    /// in the voice channel.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the handler signature uniform.
    #[instrument(skip(self, command), fields(room_id = %command.room_id, humans = command.humans_remaining))]
    pub async fn handle_voice_presence(
        &self,
        command: &UpdateVoicePresence,
    ) -> Result<Option<SessionStats>, GameError> {
        if command.humans_remaining > 0 {
            return Ok(None);
        }
        let Some(handle) = self.inner.registry.get(&command.room_id) else {
            return Ok(None);
        };
        let session = handle.lock().await;
        info!("last participant left voice; ending session");
        Ok(self
            .conclude(
                &handle,
                session,
                SessionEndReason::ParticipantsLeft,
                command.correlation_id,
            )
            .await)
    }

    fn session(&self, room_id: &RoomId) -> Result<SessionHandle, GameError> {
        self.inner
            .registry
            .get(room_id)
            .ok_or_else(|| GameError::SessionNotFound(room_id.clone()))
    }

    /// Selects a song and joins voice for `attempt`, then hands off to the
    /// playback task. Returns `Ok` without acting when the attempt was
    /// superseded while waiting.
    async fn prepare_round(
        &self,
        handle: &SessionHandle,
        attempt: u64,
        correlation_id: Uuid,
    ) -> Result<(), GameError> {
        let room_id = handle.room_id();
        let clock = self.inner.clock.as_ref();
        let options = self.inner.options.get(room_id).await;
        let filter = {
            let mut session = handle.lock().await;
            if !session.refresh_options(attempt, options) {
                debug!(%room_id, attempt, "round start superseded before song selection");
                return Ok(());
            }
            session.options().filter.clone()
        };

        let song = match self.inner.songs.select_random_song(&filter).await {
            Ok(Some(song)) => song,
            Ok(None) => {
                let err = GameError::SongQuery(
                    "no songs match this room's filters; try broadening them".to_owned(),
                );
                self.abort_round_start(handle, attempt, &err, correlation_id)
                    .await;
                return Err(err);
            }
            Err(e) => {
                error!(%room_id, error = %e, ?filter, "song selection failed");
                let err = match e {
                    GameError::SongQuery(_) => e,
                    other => GameError::SongQuery(other.to_string()),
                };
                self.abort_round_start(handle, attempt, &err, correlation_id)
                    .await;
                return Err(err);
            }
        };

        if !handle.lock().await.create_round(attempt, song, clock) {
            debug!(%room_id, attempt, "round start superseded during song selection");
            return Ok(());
        }

        let connection = match self.inner.voice.ensure_connection(room_id).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(%room_id, error = %e, "failed to obtain voice connection");
                let session = handle.lock().await;
                if session.is_current_attempt(attempt) {
                    self.conclude(
                        handle,
                        session,
                        SessionEndReason::ConnectionFailed,
                        correlation_id,
                    )
                    .await;
                }
                return Err(match e {
                    GameError::Connection(_) => e,
                    other => GameError::Connection(other.to_string()),
                });
            }
        };

        self.spawn_playback(handle.clone(), attempt, connection, correlation_id);
        Ok(())
    }

    async fn abort_round_start(
        &self,
        handle: &SessionHandle,
        attempt: u64,
        err: &GameError,
        correlation_id: Uuid,
    ) {
        let mut session = handle.lock().await;
        if session.abort_round_start(
            attempt,
            &err.to_string(),
            correlation_id,
            self.inner.clock.as_ref(),
        ) {
            self.publish(&mut session);
        }
    }

    /// Waits out the settle delay, then starts playback and arms the round's
    /// watcher and timer.
    async fn run_playback(
        &self,
        handle: SessionHandle,
        attempt: u64,
        connection: ConnectionHandle,
        correlation_id: Uuid,
    ) {
        let room_id = handle.room_id();
        let clock = self.inner.clock.as_ref();
        let (media_ref, seek_type) = {
            let session = handle.lock().await;
            let Some(round) = session.round().filter(|_| session.is_current_attempt(attempt))
            else {
                return;
            };
            (round.media_ref().to_owned(), session.options().seek_type)
        };
        let seek_seconds = self.seek_offset(seek_type, &media_ref).await;

        tokio::time::sleep(self.inner.settings.settle_delay).await;

        // Held until the round is active: commands for this room wait out a
        // slow `play` instead of observing audio for an inactive round.
        let mut session = handle.lock().await;
        if !session.is_current_attempt(attempt) {
            debug!(%room_id, attempt, "round start cancelled during settle delay");
            return;
        }

        match self
            .inner
            .media
            .play(&connection, &media_ref, seek_seconds)
            .await
        {
            Ok(signal) => {
                let token = CancellationToken::new();
                if !session.activate_round(attempt, token.clone(), seek_seconds, correlation_id, clock)
                {
                    return;
                }
                let timeout = session.options().guess_timeout();
                let round = session.rounds_played();
                self.publish(&mut session);
                drop(session);

                info!(%room_id, round, %media_ref, seek_seconds, ?seek_type, "playing song");
                self.spawn_playback_watcher(
                    handle.clone(),
                    attempt,
                    token.clone(),
                    signal,
                    correlation_id,
                );
                if let Some(timeout) = timeout {
                    self.spawn_guess_timer(handle, attempt, token, timeout, correlation_id);
                }
            }
            Err(e) => {
                warn!(%room_id, %media_ref, error = %e, "playback failed to start");
                if let Some(next) =
                    session.end_round(Some(attempt), RoundEndReason::StreamFault, correlation_id, clock)
                {
                    self.follow_up(&handle, session, next, correlation_id).await;
                }
            }
        }
    }

    async fn seek_offset(&self, seek_type: SeekType, media_ref: &str) -> f64 {
        match seek_type {
            SeekType::Beginning => 0.0,
            SeekType::Random => match self.inner.media.duration_seconds(media_ref).await {
                Ok(duration) => {
                    let fraction = self.inner.rng.lock().await.next_f64();
                    duration * RANDOM_SEEK_FRACTION * fraction
                }
                Err(e) => {
                    error!(%media_ref, error = %e, "failed to read track length; seeking from start");
                    0.0
                }
            },
        }
    }

    /// Ends `attempt`'s round for `reason` unless something else already
    /// resolved it.
    async fn finish_round(
        &self,
        handle: &SessionHandle,
        attempt: u64,
        reason: RoundEndReason,
        correlation_id: Uuid,
    ) {
        let mut session = handle.lock().await;
        let Some(next) =
            session.end_round(Some(attempt), reason, correlation_id, self.inner.clock.as_ref())
        else {
            debug!(room_id = %handle.room_id(), attempt, ?reason, "round already resolved");
            return;
        };
        info!(room_id = %handle.room_id(), attempt, ?reason, "round ended");
        self.follow_up(handle, session, next, correlation_id).await;
    }

    async fn connection_lost(&self, handle: &SessionHandle, attempt: u64, correlation_id: Uuid) {
        let session = handle.lock().await;
        if session.attempt() != attempt || session.state() != SessionState::RoundActive {
            return;
        }
        warn!(room_id = %handle.room_id(), "removed from voice channel; ending session");
        self.conclude(
            handle,
            session,
            SessionEndReason::ConnectionLost,
            correlation_id,
        )
        .await;
    }

    /// Applies the step decided when a round resolved. Called with the
    /// session still locked so the next round start is claimed atomically.
    async fn follow_up(
        &self,
        handle: &SessionHandle,
        mut session: MutexGuard<'_, Session>,
        next: NextStep,
        correlation_id: Uuid,
    ) {
        self.publish(&mut session);
        match next {
            NextStep::StartNextRound => {
                let attempt = session.begin_round_start(&[]);
                drop(session);
                self.inner.media.stop(handle.room_id()).await;
                match attempt {
                    Ok(attempt) => self.spawn_round_start(handle.clone(), attempt, correlation_id),
                    Err(e) => warn!(room_id = %handle.room_id(), error = %e, "could not continue"),
                }
            }
            NextStep::Idle => {
                drop(session);
                self.inner.media.stop(handle.room_id()).await;
            }
            NextStep::EndSession(reason) => {
                self.conclude(handle, session, reason, correlation_id).await;
            }
        }
    }

    /// Ends the session, removes it from the registry, leaves voice and
    /// persists the final statistics. Returns `None` if it had already ended.
    async fn conclude(
        &self,
        handle: &SessionHandle,
        mut session: MutexGuard<'_, Session>,
        reason: SessionEndReason,
        correlation_id: Uuid,
    ) -> Option<SessionStats> {
        let stats = session.end(reason, correlation_id, self.inner.clock.as_ref())?;
        self.inner.registry.remove(handle.room_id(), handle.id());
        self.publish(&mut session);
        let participants = session.participants();
        drop(session);

        let room_id = handle.room_id();
        info!(
            %room_id,
            session_id = %stats.session_id,
            ?reason,
            rounds_played = stats.rounds_played,
            participants = stats.participant_count,
            "session ended"
        );
        self.inner.media.stop(room_id).await;
        self.inner.voice.disconnect(room_id).await;

        if let Err(e) = self.inner.store.record_session(&stats).await {
            warn!(%room_id, error = %e, "failed to record session statistics");
        }
        if let Err(e) = self
            .inner
            .store
            .increment_counter(room_id, RoomCounter::GamesPlayed)
            .await
        {
            warn!(%room_id, error = %e, "failed to increment games played");
        }
        if let Err(e) = self
            .inner
            .store
            .record_player_games(&participants, self.inner.clock.now())
            .await
        {
            warn!(%room_id, error = %e, "failed to record player games");
        }
        Some(stats)
    }

    /// Records a correct guess against the room and the player without
    /// holding up the guess response.
    fn spawn_guess_writes(&self, room_id: RoomId, player_id: PlayerId) {
        let store = Arc::clone(&self.inner.store);
        let now = self.inner.clock.now();
        tokio::spawn(async move {
            if let Err(e) = store
                .increment_counter(&room_id, RoomCounter::SongsGuessed)
                .await
            {
                warn!(%room_id, error = %e, "failed to increment songs guessed");
            }
            if let Err(e) = store.touch_room(&room_id, now).await {
                warn!(%room_id, error = %e, "failed to update last activity");
            }
            if let Err(e) = store.record_player_guess(&player_id, now).await {
                warn!(%room_id, %player_id, error = %e, "failed to record player guess");
            }
        });
    }

    fn publish(&self, session: &mut Session) {
        for event in session.take_events() {
            debug!(
                room_id = %event.room_id,
                event_type = event.kind.event_type(),
                sequence = event.metadata.sequence_number,
                "publishing game event"
            );
            // No subscribers is fine.
            let _ = self.inner.events.send(event);
        }
    }

    fn spawn_round_start(&self, handle: SessionHandle, attempt: u64, correlation_id: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.prepare_round(&handle, attempt, correlation_id).await {
                warn!(room_id = %handle.room_id(), error = %e, "automatic round start failed");
            }
        });
    }

    fn spawn_playback(
        &self,
        handle: SessionHandle,
        attempt: u64,
        connection: ConnectionHandle,
        correlation_id: Uuid,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .run_playback(handle, attempt, connection, correlation_id)
                .await;
        });
    }

    fn spawn_playback_watcher(
        &self,
        handle: SessionHandle,
        attempt: u64,
        token: CancellationToken,
        signal: PlaybackSignal,
        correlation_id: Uuid,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => return,
                outcome = signal => outcome,
            };
            match outcome {
                Ok(PlaybackOutcome::Finished) => {
                    engine
                        .finish_round(&handle, attempt, RoundEndReason::MediaFinished, correlation_id)
                        .await;
                }
                Ok(PlaybackOutcome::Fault(message)) => {
                    warn!(room_id = %handle.room_id(), %message, "stream fault; starting a new round");
                    engine
                        .finish_round(&handle, attempt, RoundEndReason::StreamFault, correlation_id)
                        .await;
                }
                Ok(PlaybackOutcome::Disconnected) => {
                    engine.connection_lost(&handle, attempt, correlation_id).await;
                }
                Err(_) => {
                    warn!(room_id = %handle.room_id(), "playback signal dropped");
                    engine
                        .finish_round(&handle, attempt, RoundEndReason::StreamFault, correlation_id)
                        .await;
                }
            }
        });
    }

    fn spawn_guess_timer(
        &self,
        handle: SessionHandle,
        attempt: u64,
        token: CancellationToken,
        timeout: Duration,
        correlation_id: Uuid,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    info!(room_id = %handle.room_id(), ?timeout, "guess timeout elapsed");
                    engine
                        .finish_round(&handle, attempt, RoundEndReason::Timeout, correlation_id)
                        .await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use songquiz_core::ids::Player;
    use songquiz_core::options::RoomOptions;
    use songquiz_core::ports::SelectedSong;
    use songquiz_core::options::ScoringMode;
    use songquiz_test_support::{
        FixedClock, MockRng, RecordingStore, ScriptedMediaPlayer, ScriptedSongSelector,
        SequenceRng, StalledStore, StubVoiceConnector,
    };

    use crate::domain::events::{
        GUESS_RESOLVED_EVENT_TYPE, GameEventKind, PLAYER_ELIMINATED_EVENT_TYPE,
        ROUND_ENDED_EVENT_TYPE, ROUND_STARTED_EVENT_TYPE, SESSION_ENDED_EVENT_TYPE,
    };

    const ROOM: &str = "guild-1";

    struct Harness {
        engine: GameEngine,
        songs: Arc<ScriptedSongSelector>,
        voice: Arc<StubVoiceConnector>,
        media: Arc<ScriptedMediaPlayer>,
        store: Arc<RecordingStore>,
        events: broadcast::Receiver<GameEvent>,
    }

    struct Setup {
        options: RoomOptions,
        songs: ScriptedSongSelector,
        voice: StubVoiceConnector,
        media: ScriptedMediaPlayer,
        rng: Box<dyn DeterministicRng>,
        rules: RoundRules,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                options: RoomOptions::default(),
                songs: ScriptedSongSelector::new(vec![song("Psycho"), song("Feel My Rhythm")]),
                voice: StubVoiceConnector::connected(),
                media: ScriptedMediaPlayer::new(),
                rng: Box::new(MockRng),
                rules: RoundRules::default(),
            }
        }
    }

    fn song(name: &str) -> SelectedSong {
        SelectedSong {
            name: name.to_owned(),
            artist: "Red Velvet".to_owned(),
            media_ref: format!("{}-ref", name.to_lowercase().replace(' ', "-")),
            aliases: vec![],
        }
    }

    fn room() -> RoomId {
        RoomId::new(ROOM)
    }

    fn harness(setup: Setup) -> Harness {
        let store = Arc::new(RecordingStore::new());
        store.seed_options(&room(), setup.options.to_blob());
        let songs = Arc::new(setup.songs);
        let voice = Arc::new(setup.voice);
        let media = Arc::new(setup.media);
        let clock = FixedClock::start();
        let engine = GameEngine::new(
            Collaborators {
                songs: songs.clone(),
                voice: voice.clone(),
                media: media.clone(),
                store: store.clone(),
                clock: Arc::new(clock),
                rng: setup.rng,
            },
            Arc::new(RoomOptionsCache::new(store.clone())),
            EngineSettings {
                rules: setup.rules,
                ..EngineSettings::default()
            },
        );
        let events = engine.subscribe();
        Harness {
            engine,
            songs,
            voice,
            media,
            store,
            events,
        }
    }

    fn start_command() -> StartRound {
        StartRound {
            correlation_id: Uuid::new_v4(),
            room_id: room(),
            roster: vec![],
        }
    }

    fn irene() -> Player {
        Player::new("irene", "irene#1234", "someurl")
    }

    fn guess(text: &str) -> SubmitGuess {
        guess_as(&irene(), text)
    }

    fn guess_as(player: &Player, text: &str) -> SubmitGuess {
        SubmitGuess {
            correlation_id: Uuid::new_v4(),
            room_id: room(),
            player: player.clone(),
            text: text.to_owned(),
            mode: None,
        }
    }

    async fn wait_for(events: &mut broadcast::Receiver<GameEvent>, event_type: &str) -> GameEvent {
        tokio::time::timeout(Duration::from_secs(600), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.kind.event_type() == event_type {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event_type}"))
    }

    fn drain(events: &mut broadcast::Receiver<GameEvent>) -> Vec<GameEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    async fn session_state(engine: &GameEngine) -> Option<SessionState> {
        match engine.registry().get(&room()) {
            Some(handle) => Some(handle.lock().await.state()),
            None => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_round_plays_song_after_settle_delay() {
        // Arrange
        let mut h = harness(Setup::default());

        // Act
        let accepted = h.engine.handle_start_round(&start_command()).await.unwrap();
        let started = wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Assert
        assert!(accepted.session_created);
        assert_eq!(started.metadata.session_id, accepted.session_id);
        let plays = h.media.plays();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].media_ref, "psycho-ref");
        assert!(plays[0].seek_seconds.abs() < f64::EPSILON);
        assert_eq!(session_state(&h.engine).await, Some(SessionState::RoundActive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_while_starting_is_rejected() {
        let h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();

        let result = h.engine.handle_start_round(&start_command()).await;

        assert!(matches!(result, Err(GameError::AlreadyInSession(_))));
        assert_eq!(h.songs.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correct_guess_scores_and_starts_next_round() {
        // Arrange
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        let verdict = h.engine.handle_submit_guess(&guess("PSYCHO")).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Assert
        assert!(verdict.correct);
        let plays = h.media.plays();
        assert_eq!(plays.len(), 2);
        assert_eq!(plays[1].media_ref, "feel-my-rhythm-ref");
        assert_eq!(
            h.store.counter_increments(),
            vec![(room(), RoomCounter::SongsGuessed)]
        );
        assert_eq!(h.store.touched_rooms(), vec![room()]);
        let handle = h.engine.registry().get(&room()).unwrap();
        let session = handle.lock().await;
        assert_eq!(session.rounds_played(), 2);
        assert_eq!(session.scoreboard().leaders()[0].score, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incorrect_guess_keeps_round_running() {
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        let verdict = h.engine.handle_submit_guess(&guess("feel my rhythm")).await.unwrap();

        assert!(!verdict.correct);
        assert_eq!(session_state(&h.engine).await, Some(SessionState::RoundActive));
        assert!(h.store.counter_increments().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guess_without_session_is_not_found() {
        let h = harness(Setup::default());

        let result = h.engine.handle_submit_guess(&guess("psycho")).await;

        assert!(matches!(result, Err(GameError::SessionNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matching_song_aborts_round_but_keeps_session() {
        // Arrange
        let h = harness(Setup {
            songs: ScriptedSongSelector::empty(),
            ..Setup::default()
        });

        // Act
        let first = h.engine.handle_start_round(&start_command()).await;
        let second = h.engine.handle_start_round(&start_command()).await;

        // Assert
        assert!(matches!(first, Err(GameError::SongQuery(_))));
        assert!(matches!(second, Err(GameError::SongQuery(_))));
        assert_eq!(session_state(&h.engine).await, Some(SessionState::Idle));
        assert!(h.voice.disconnects().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_ends_session() {
        // Arrange
        let mut h = harness(Setup {
            voice: StubVoiceConnector::failing(),
            ..Setup::default()
        });

        // Act
        let result = h.engine.handle_start_round(&start_command()).await;

        // Assert
        assert!(matches!(result, Err(GameError::Connection(_))));
        assert!(h.engine.registry().is_empty());
        let ended = wait_for(&mut h.events, SESSION_ENDED_EVENT_TYPE).await;
        match ended.kind {
            GameEventKind::SessionEnded(payload) => {
                assert_eq!(payload.reason, SessionEndReason::ConnectionFailed);
                assert_eq!(payload.stats.rounds_played, 1);
            }
            other => panic!("expected SessionEnded, got {other:?}"),
        }
        assert_eq!(h.store.recorded_sessions().len(), 1);
        assert_eq!(
            h.store.counter_increments(),
            vec![(room(), RoomCounter::GamesPlayed)]
        );
        assert!(h.media.plays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timeout_after_correct_guess_does_nothing() {
        // Arrange
        let mut h = harness(Setup {
            options: RoomOptions {
                guess_timeout_secs: Some(5),
                ..RoomOptions::default()
            },
            ..Setup::default()
        });
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;
        h.engine.handle_submit_guess(&guess("psycho")).await.unwrap();

        // Act: run past the first round's deadline but not the second's
        tokio::time::sleep(Duration::from_secs(6)).await;

        // Assert
        let events = drain(&mut h.events);
        let timeouts = events
            .iter()
            .filter(|e| {
                matches!(&e.kind, GameEventKind::RoundEnded(ended) if ended.reason == RoundEndReason::Timeout)
            })
            .count();
        let guesses = events
            .iter()
            .filter(|e| e.kind.event_type() == GUESS_RESOLVED_EVENT_TYPE)
            .count();
        assert_eq!(timeouts, 0);
        assert_eq!(guesses, 1);
        assert_eq!(h.media.plays().len(), 2);
        assert_eq!(session_state(&h.engine).await, Some(SessionState::RoundActive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_round_and_continues() {
        // Arrange
        let mut h = harness(Setup {
            options: RoomOptions {
                guess_timeout_secs: Some(5),
                ..RoomOptions::default()
            },
            ..Setup::default()
        });
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        let ended = wait_for(&mut h.events, ROUND_ENDED_EVENT_TYPE).await;
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Assert
        match ended.kind {
            GameEventKind::RoundEnded(payload) => {
                assert_eq!(payload.reason, RoundEndReason::Timeout);
                assert_eq!(payload.answer.as_deref(), Some("Psycho"));
            }
            other => panic!("expected RoundEnded, got {other:?}"),
        }
        assert_eq!(h.media.plays().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_finished_signal_ends_round() {
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        assert!(h.media.emit(PlaybackOutcome::Finished));
        let ended = wait_for(&mut h.events, ROUND_ENDED_EVENT_TYPE).await;

        assert!(matches!(
            ended.kind,
            GameEventKind::RoundEnded(ref payload) if payload.reason == RoundEndReason::MediaFinished
        ));
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_fault_recovers_with_new_round() {
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        h.media.emit(PlaybackOutcome::Fault("decoder error".to_owned()));
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        assert_eq!(h.media.plays().len(), 2);
        assert!(h.store.recorded_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_limit_ends_session() {
        // Arrange
        let mut h = harness(Setup {
            rules: RoundRules {
                max_consecutive_faults: Some(1),
                ..RoundRules::default()
            },
            ..Setup::default()
        });
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        h.media.emit(PlaybackOutcome::Fault("decoder error".to_owned()));
        let ended = wait_for(&mut h.events, SESSION_ENDED_EVENT_TYPE).await;

        // Assert
        assert!(matches!(
            ended.kind,
            GameEventKind::SessionEnded(ref payload) if payload.reason == SessionEndReason::FaultLimit
        ));
        assert!(h.engine.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_play_counts_as_stream_fault() {
        let mut h = harness(Setup {
            media: ScriptedMediaPlayer::new().failing_plays(1),
            ..Setup::default()
        });

        h.engine.handle_start_round(&start_command()).await.unwrap();
        let ended = wait_for(&mut h.events, ROUND_ENDED_EVENT_TYPE).await;
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        assert!(matches!(
            ended.kind,
            GameEventKind::RoundEnded(ref payload) if payload.reason == RoundEndReason::StreamFault
        ));
        assert_eq!(h.media.plays().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_signal_ends_session() {
        // Arrange
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        h.media.emit(PlaybackOutcome::Disconnected);
        let ended = wait_for(&mut h.events, SESSION_ENDED_EVENT_TYPE).await;

        // Assert
        assert!(matches!(
            ended.kind,
            GameEventKind::SessionEnded(ref payload) if payload.reason == SessionEndReason::ConnectionLost
        ));
        assert!(h.engine.registry().is_empty());
        assert_eq!(h.voice.disconnects(), vec![room()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_settle_delay_prevents_playback() {
        // Arrange
        let h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();

        // Act
        let ended = h
            .engine
            .handle_end_round(&EndRound {
                correlation_id: Uuid::new_v4(),
                room_id: room(),
                reason: RoundEndReason::Stopped,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Assert
        assert!(ended);
        assert!(h.media.plays().is_empty());
        assert_eq!(session_state(&h.engine).await, Some(SessionState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_starts_next_round() {
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        h.engine
            .handle_end_round(&EndRound {
                correlation_id: Uuid::new_v4(),
                room_id: room(),
                reason: RoundEndReason::Skipped,
            })
            .await
            .unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        assert_eq!(h.media.plays().len(), 2);
        assert!(h.media.stops() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_round_rejects_internal_reasons() {
        let h = harness(Setup::default());

        let result = h
            .engine
            .handle_end_round(&EndRound {
                correlation_id: Uuid::new_v4(),
                room_id: room(),
                reason: RoundEndReason::Timeout,
            })
            .await;

        assert!(matches!(result, Err(GameError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_persists_stats_once() {
        // Arrange
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;
        h.engine.handle_submit_guess(&guess("psycho")).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;
        let end = EndSession {
            correlation_id: Uuid::new_v4(),
            room_id: room(),
        };

        // Act
        let stats = h.engine.handle_end_session(&end).await.unwrap();
        let again = h.engine.handle_end_session(&end).await;

        // Assert
        assert_eq!(stats.participant_count, 1);
        assert_eq!(stats.rounds_played, 2);
        assert!(matches!(again, Err(GameError::SessionNotFound(_))));
        assert_eq!(h.store.recorded_sessions(), vec![stats]);
        let games_played = h
            .store
            .counter_increments()
            .into_iter()
            .filter(|(_, counter)| *counter == RoomCounter::GamesPlayed)
            .count();
        assert_eq!(games_played, 1);
        assert_eq!(h.voice.disconnects(), vec![room()]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.media.plays().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_human_leaving_voice_ends_session() {
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        let stats = h
            .engine
            .handle_voice_presence(&UpdateVoicePresence {
                correlation_id: Uuid::new_v4(),
                room_id: room(),
                humans_remaining: 0,
            })
            .await
            .unwrap();

        assert!(stats.is_some());
        assert!(h.engine.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_presence_with_humans_left_is_ignored() {
        let h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();

        let stats = h
            .engine
            .handle_voice_presence(&UpdateVoicePresence {
                correlation_id: Uuid::new_v4(),
                room_id: room(),
                humans_remaining: 2,
            })
            .await
            .unwrap();

        assert!(stats.is_none());
        assert_eq!(h.engine.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_reached_ends_session_after_guess() {
        // Arrange
        let mut h = harness(Setup {
            options: RoomOptions {
                goal: Some(1),
                ..RoomOptions::default()
            },
            ..Setup::default()
        });
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        h.engine.handle_submit_guess(&guess("psycho")).await.unwrap();

        // Assert
        let ended = wait_for(&mut h.events, SESSION_ENDED_EVENT_TYPE).await;
        assert!(matches!(
            ended.kind,
            GameEventKind::SessionEnded(ref payload) if payload.reason == SessionEndReason::GoalReached
        ));
        assert!(h.engine.registry().is_empty());
        assert_eq!(h.media.plays().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_seek_uses_track_length_fraction() {
        let mut h = harness(Setup {
            options: RoomOptions {
                seek_type: SeekType::Random,
                ..RoomOptions::default()
            },
            media: ScriptedMediaPlayer::new().with_duration(200.0),
            rng: Box::new(SequenceRng::with_fractions(vec![0.5])),
            ..Setup::default()
        });

        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        let plays = h.media.plays();
        assert!((plays[0].seek_seconds - 60.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_seek_falls_back_to_start_when_length_unknown() {
        let mut h = harness(Setup {
            options: RoomOptions {
                seek_type: SeekType::Random,
                ..RoomOptions::default()
            },
            rng: Box::new(SequenceRng::with_fractions(vec![0.5])),
            ..Setup::default()
        });

        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        assert!(h.media.plays()[0].seek_seconds.abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correct_guess_records_player_and_room_counters() {
        // Arrange
        let mut h = harness(Setup::default());
        h.engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        h.engine.handle_submit_guess(&guess("psycho")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        let profile = h.store.player(&irene().id).unwrap();
        assert_eq!(profile.songs_guessed, 1);
        assert_eq!(profile.games_played, 0);
        assert_eq!(h.store.touched_rooms(), vec![room()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guess_response_does_not_wait_for_the_store() {
        // Arrange
        let store: Arc<dyn PersistenceStore> = Arc::new(StalledStore);
        let engine = GameEngine::new(
            Collaborators {
                songs: Arc::new(ScriptedSongSelector::new(vec![song("Psycho")])),
                voice: Arc::new(StubVoiceConnector::connected()),
                media: Arc::new(ScriptedMediaPlayer::new()),
                store: Arc::clone(&store),
                clock: Arc::new(FixedClock::start()),
                rng: Box::new(MockRng),
            },
            Arc::new(RoomOptionsCache::new(store)),
            EngineSettings::default(),
        );
        let mut events = engine.subscribe();
        engine.handle_start_round(&start_command()).await.unwrap();
        wait_for(&mut events, ROUND_STARTED_EVENT_TYPE).await;

        // Act
        let verdict = tokio::time::timeout(
            Duration::from_secs(1),
            engine.handle_submit_guess(&guess("psycho")),
        )
        .await;

        // Assert
        assert!(verdict.expect("guess waited on the store").unwrap().correct);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elimination_game_ends_with_last_survivor() {
        // Arrange
        let seulgi = Player::new("seulgi", "seulgi#7854", "someurl");
        let joy = Player::new("joy", "joy#4144", "someurl");
        let mut h = harness(Setup {
            options: RoomOptions {
                scoring_mode: ScoringMode::Elimination,
                starting_lives: 2,
                ..RoomOptions::default()
            },
            ..Setup::default()
        });
        let start = StartRound {
            correlation_id: Uuid::new_v4(),
            room_id: room(),
            roster: vec![irene(), seulgi.clone(), joy.clone()],
        };
        h.engine.handle_start_round(&start).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;

        // Act: irene then joy answer, leaving seulgi without lives
        h.engine.handle_submit_guess(&guess("psycho")).await.unwrap();
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;
        h.engine
            .handle_submit_guess(&guess_as(&joy, "feel my rhythm"))
            .await
            .unwrap();
        let eliminated = wait_for(&mut h.events, PLAYER_ELIMINATED_EVENT_TYPE).await;
        wait_for(&mut h.events, ROUND_STARTED_EVENT_TYPE).await;
        let eliminated_guess = h
            .engine
            .handle_submit_guess(&guess_as(&seulgi, "psycho"))
            .await
            .unwrap();
        let winning_guess = h.engine.handle_submit_guess(&guess("psycho")).await.unwrap();
        let ended = wait_for(&mut h.events, SESSION_ENDED_EVENT_TYPE).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Assert
        assert!(matches!(
            eliminated.kind,
            GameEventKind::PlayerEliminated(ref payload) if payload.player.id == seulgi.id
        ));
        assert!(!eliminated_guess.correct);
        assert!(winning_guess.correct);
        match ended.kind {
            GameEventKind::SessionEnded(payload) => {
                assert_eq!(payload.reason, SessionEndReason::GoalReached);
                assert_eq!(payload.stats.rounds_played, 3);
                assert_eq!(payload.stats.participant_count, 2);
            }
            other => panic!("expected SessionEnded, got {other:?}"),
        }
        assert!(h.engine.registry().is_empty());
        let irene_profile = h.store.player(&irene().id).unwrap();
        assert_eq!(irene_profile.songs_guessed, 2);
        assert_eq!(irene_profile.games_played, 1);
        assert!(h.store.player(&seulgi.id).is_none());
    }
}
