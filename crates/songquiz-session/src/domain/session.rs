//! The per-room session state machine.
//!
//! A [`Session`] owns the current [`Round`], the scoreboard chosen at
//! creation and the bookkeeping that feeds the final statistics. All methods
//! are synchronous; the engine serializes access behind a per-session lock
//! and re-validates with [`Session::is_current_attempt`] after every
//! suspension point.
//!
//! ```text
//! Idle -> RoundStarting -> RoundActive -> RoundEnding -> RoundStarting | Ended
//! ```
//!
//! `Ended` is reachable from every state and is terminal.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use songquiz_core::clock::Clock;
use songquiz_core::error::GameError;
use songquiz_core::event::EventMetadata;
use songquiz_core::ids::{Player, PlayerId, RoomId};
use songquiz_core::options::{GuessMode, RoomOptions};
use songquiz_core::ports::{SelectedSong, SessionStats};
use songquiz_scoring::{GuessResult, ScoringStrategy, strategy_for};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{
    GameEvent, GameEventKind, GuessResolved, PlayerEliminated, RoundAborted, RoundEnded,
    RoundStarted, SessionCreated, SessionEnded,
};
use super::round::Round;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No round in progress.
    Idle,
    /// A round is being prepared (song selection, voice, settle delay).
    RoundStarting,
    /// Audio is playing and guesses are accepted.
    RoundActive,
    /// A round has just resolved; the next step is being decided.
    RoundEnding,
    /// Terminal.
    Ended,
}

/// Why a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEndReason {
    /// A player guessed the answer.
    CorrectGuess,
    /// The room's guess timeout elapsed.
    Timeout,
    /// The track played to its end.
    MediaFinished,
    /// Playback failed.
    StreamFault,
    /// A player skipped the song; play continues with a new round.
    Skipped,
    /// A player stopped the game; the session goes idle.
    Stopped,
}

impl RoundEndReason {
    /// Whether a caller may request this reason directly.
    #[must_use]
    pub fn is_requestable(self) -> bool {
        matches!(self, Self::Skipped | Self::Stopped)
    }

    fn penalizes_unanswered(self) -> bool {
        matches!(self, Self::Timeout | Self::MediaFinished | Self::Skipped)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// An explicit end command.
    Requested,
    /// The scoreboard reports the game finished: the goal was reached, or
    /// elimination left at most one survivor.
    GoalReached,
    /// The last human left the voice channel.
    ParticipantsLeft,
    /// The voice channel could not be joined.
    ConnectionFailed,
    /// The voice connection dropped mid-round.
    ConnectionLost,
    /// Too many consecutive stream faults.
    FaultLimit,
}

/// What follows a resolved round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Start another round immediately.
    StartNextRound,
    /// Wait for an explicit start.
    Idle,
    /// End the session.
    EndSession(SessionEndReason),
}

/// Result of evaluating a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// No round accepts guesses, or the player is eliminated.
    Ignored,
    /// The guess does not match.
    Incorrect,
    /// The guess resolved the round.
    Correct {
        /// What the engine must do next.
        next: NextStep,
    },
}

impl GuessOutcome {
    /// Whether the guess was correct.
    #[must_use]
    pub fn is_correct(self) -> bool {
        matches!(self, Self::Correct { .. })
    }
}

/// Scoring and fault rules fixed for a session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRules {
    /// Points credited for a correct guess.
    pub points_per_guess: u32,
    /// Experience credited for a correct guess.
    pub exp_per_guess: u32,
    /// Consecutive stream faults after which the session ends. `None` never
    /// ends the session on faults.
    pub max_consecutive_faults: Option<u32>,
}

impl Default for RoundRules {
    fn default() -> Self {
        Self {
            points_per_guess: 1,
            exp_per_guess: 10,
            max_consecutive_faults: None,
        }
    }
}

/// The state machine for one room's game.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    room_id: RoomId,
    state: SessionState,
    options: RoomOptions,
    rules: RoundRules,
    scoreboard: Box<dyn ScoringStrategy>,
    round: Option<Round>,
    participants: HashSet<PlayerId>,
    rounds_played: u32,
    started_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    guess_latencies: Vec<TimeDelta>,
    round_token: Option<CancellationToken>,
    initializing: bool,
    attempt: u64,
    consecutive_faults: u32,
    sequence: i64,
    uncommitted_events: Vec<GameEvent>,
}

impl Session {
    /// Creates an idle session. The scoring mode is taken from `options` and
    /// never changes afterwards.
    #[must_use]
    pub fn new(
        id: Uuid,
        room_id: RoomId,
        options: RoomOptions,
        rules: RoundRules,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Self {
        let now = clock.now();
        let mut session = Self {
            id,
            room_id,
            state: SessionState::Idle,
            scoreboard: strategy_for(options.scoring_mode, options.starting_lives),
            options,
            rules,
            round: None,
            participants: HashSet::new(),
            rounds_played: 0,
            started_at: now,
            last_active_at: now,
            guess_latencies: Vec::new(),
            round_token: None,
            initializing: false,
            attempt: 0,
            consecutive_faults: 0,
            sequence: 0,
            uncommitted_events: Vec::new(),
        };
        let scoring_mode = session.scoreboard.mode();
        session.record(
            correlation_id,
            now,
            GameEventKind::SessionCreated(SessionCreated { scoring_mode }),
        );
        session
    }

    /// Enters `RoundStarting` and returns the attempt number that every later
    /// step of this start must present. Roster members not yet on an
    /// elimination board are enrolled.
    ///
    /// # Errors
    ///
    /// Returns `GameError::SessionEnded` once the session has ended, and
    /// `GameError::AlreadyInSession` while another round is starting or
    /// playing. Neither changes any state.
    pub fn begin_round_start(&mut self, roster: &[Player]) -> Result<u64, GameError> {
        if self.state == SessionState::Ended {
            return Err(GameError::SessionEnded(self.room_id.clone()));
        }
        if self.initializing
            || !matches!(self.state, SessionState::Idle | SessionState::RoundEnding)
        {
            return Err(GameError::AlreadyInSession(self.room_id.clone()));
        }

        for player in roster {
            self.scoreboard.enroll(player);
        }
        self.initializing = true;
        self.state = SessionState::RoundStarting;
        self.round = None;
        self.attempt += 1;
        Ok(self.attempt)
    }

    /// Whether `attempt` is the round start still in progress.
    #[must_use]
    pub fn is_current_attempt(&self, attempt: u64) -> bool {
        self.state == SessionState::RoundStarting && self.attempt == attempt
    }

    /// Replaces the room options consulted by the pending round start.
    pub fn refresh_options(&mut self, attempt: u64, options: RoomOptions) -> bool {
        if !self.is_current_attempt(attempt) {
            return false;
        }
        self.options = options;
        true
    }

    /// Abandons a round start (e.g. no song matched) and returns to `Idle`.
    pub fn abort_round_start(
        &mut self,
        attempt: u64,
        reason: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> bool {
        if !self.is_current_attempt(attempt) {
            return false;
        }
        self.state = SessionState::Idle;
        self.initializing = false;
        self.record(
            correlation_id,
            clock.now(),
            GameEventKind::RoundAborted(RoundAborted {
                reason: reason.to_owned(),
            }),
        );
        true
    }

    /// Installs the round for `song`.
    pub fn create_round(&mut self, attempt: u64, song: SelectedSong, clock: &dyn Clock) -> bool {
        if !self.is_current_attempt(attempt) {
            return false;
        }
        self.round = Some(Round::new(song, clock.now()));
        self.rounds_played += 1;
        true
    }

    /// Moves to `RoundActive` once playback has begun. `token` cancels the
    /// round's timer and playback watcher when the round ends.
    pub fn activate_round(
        &mut self,
        attempt: u64,
        token: CancellationToken,
        seek_seconds: f64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> bool {
        if !self.is_current_attempt(attempt) {
            return false;
        }
        let now = clock.now();
        let Some(round) = self.round.as_mut().filter(|round| !round.is_finished()) else {
            return false;
        };
        round.begin_playback(now);
        let media_ref = round.media_ref().to_owned();

        self.state = SessionState::RoundActive;
        self.initializing = false;
        self.round_token = Some(token);
        self.record(
            correlation_id,
            now,
            GameEventKind::RoundStarted(RoundStarted {
                round_number: self.rounds_played,
                media_ref,
                seek_seconds,
            }),
        );
        true
    }

    /// Evaluates a guess against the active round. A correct guess finishes
    /// the round, credits the guesser and decides the next step.
    pub fn submit_guess(
        &mut self,
        player: &Player,
        text: &str,
        mode: Option<GuessMode>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> GuessOutcome {
        if self.state != SessionState::RoundActive || !self.scoreboard.can_guess(&player.id) {
            return GuessOutcome::Ignored;
        }
        let mode = mode.unwrap_or(self.options.guess_mode);
        let Some(round) = self.round.as_mut() else {
            return GuessOutcome::Ignored;
        };
        if round.is_finished() {
            return GuessOutcome::Ignored;
        }
        self.participants.insert(player.id.clone());
        if !round.check_guess(text, mode) {
            return GuessOutcome::Incorrect;
        }
        if !round.finish() {
            return GuessOutcome::Ignored;
        }

        let now = clock.now();
        let latency = clock.since(round.started_at());
        let answer = round.answer().to_owned();
        let artist = round.artist().to_owned();

        self.guess_latencies.push(latency);
        self.last_active_at = now;
        self.record(
            correlation_id,
            now,
            GameEventKind::GuessResolved(GuessResolved {
                player: player.clone(),
                answer,
                artist,
                guess_seconds: seconds(latency),
            }),
        );

        let result = GuessResult {
            player: player.clone(),
            points_earned: self.rules.points_per_guess,
            exp_gain: self.rules.exp_per_guess,
        };
        self.apply_scoring(correlation_id, now, |board| board.record_round(&[result]));

        let next = self.close_round(RoundEndReason::CorrectGuess, correlation_id, now);
        GuessOutcome::Correct { next }
    }

    /// Ends the current round. `attempt` identifies the round a timer or
    /// playback callback was armed for; `None` targets whatever round is in
    /// progress. Returns `None` without touching any state when there is no
    /// such round or it already finished.
    pub fn end_round(
        &mut self,
        attempt: Option<u64>,
        reason: RoundEndReason,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Option<NextStep> {
        if attempt.is_some_and(|attempt| attempt != self.attempt) {
            return None;
        }
        let was_active = match self.state {
            SessionState::RoundActive => {
                if !self.round.as_mut().is_some_and(Round::finish) {
                    return None;
                }
                true
            }
            SessionState::RoundStarting => {
                if let Some(round) = self.round.as_mut() {
                    round.finish();
                }
                false
            }
            SessionState::Idle | SessionState::RoundEnding | SessionState::Ended => return None,
        };

        let now = clock.now();
        if was_active && reason.penalizes_unanswered() {
            self.apply_scoring(correlation_id, now, |board| board.record_unanswered_round());
        }
        Some(self.close_round(reason, correlation_id, now))
    }

    /// Ends the session. Returns the final statistics the first time only.
    pub fn end(
        &mut self,
        reason: SessionEndReason,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Option<SessionStats> {
        if self.state == SessionState::Ended {
            return None;
        }
        if let Some(token) = self.round_token.take() {
            token.cancel();
        }
        if let Some(round) = self.round.as_mut() {
            round.finish();
        }
        self.state = SessionState::Ended;
        self.initializing = false;

        let stats = self.stats(clock);
        self.record(
            correlation_id,
            clock.now(),
            GameEventKind::SessionEnded(SessionEnded {
                reason,
                stats: stats.clone(),
            }),
        );
        Some(stats)
    }

    /// Statistics accumulated so far.
    #[must_use]
    pub fn stats(&self, clock: &dyn Clock) -> SessionStats {
        let average_guess_seconds = if self.guess_latencies.is_empty() {
            None
        } else {
            let total: f64 = self.guess_latencies.iter().copied().map(seconds).sum();
            Some(total / count_f64(self.guess_latencies.len()))
        };

        SessionStats {
            session_id: self.id,
            room_id: self.room_id.clone(),
            started_at: self.started_at,
            rounds_played: self.rounds_played,
            participant_count: u32::try_from(self.participants.len()).unwrap_or(u32::MAX),
            average_guess_seconds,
            session_length_minutes: seconds(clock.since(self.started_at)) / 60.0,
        }
    }

    fn close_round(
        &mut self,
        reason: RoundEndReason,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> NextStep {
        if let Some(token) = self.round_token.take() {
            token.cancel();
        }
        self.initializing = false;
        if reason == RoundEndReason::StreamFault {
            self.consecutive_faults += 1;
        } else {
            self.consecutive_faults = 0;
        }

        let (answer, artist) = self.round.as_ref().map_or((None, None), |round| {
            (Some(round.answer().to_owned()), Some(round.artist().to_owned()))
        });
        self.record(
            correlation_id,
            now,
            GameEventKind::RoundEnded(RoundEnded {
                reason,
                answer,
                artist,
            }),
        );

        let next = self.next_step(reason);
        self.state = match next {
            NextStep::Idle => SessionState::Idle,
            NextStep::StartNextRound | NextStep::EndSession(_) => SessionState::RoundEnding,
        };
        next
    }

    fn next_step(&self, reason: RoundEndReason) -> NextStep {
        if reason == RoundEndReason::Stopped {
            return NextStep::Idle;
        }
        if self
            .rules
            .max_consecutive_faults
            .is_some_and(|limit| self.consecutive_faults >= limit)
        {
            return NextStep::EndSession(SessionEndReason::FaultLimit);
        }
        if self.scoreboard.game_finished(self.options.goal) {
            return NextStep::EndSession(SessionEndReason::GoalReached);
        }
        NextStep::StartNextRound
    }

    fn apply_scoring(
        &mut self,
        correlation_id: Uuid,
        now: DateTime<Utc>,
        update: impl FnOnce(&mut dyn ScoringStrategy),
    ) {
        let already_out = self.eliminated_players();
        update(self.scoreboard.as_mut());

        let newly_out: Vec<Player> = self
            .scoreboard
            .standings()
            .into_iter()
            .filter(|s| s.lives == Some(0) && !already_out.contains(&s.player.id))
            .map(|s| s.player)
            .collect();
        for player in newly_out {
            self.record(
                correlation_id,
                now,
                GameEventKind::PlayerEliminated(PlayerEliminated { player }),
            );
        }
    }

    fn eliminated_players(&self) -> HashSet<PlayerId> {
        self.scoreboard
            .standings()
            .into_iter()
            .filter(|s| s.lives == Some(0))
            .map(|s| s.player.id)
            .collect()
    }

    fn record(&mut self, correlation_id: Uuid, occurred_at: DateTime<Utc>, kind: GameEventKind) {
        self.sequence += 1;
        let event = GameEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                session_id: self.id,
                sequence_number: self.sequence,
                correlation_id,
                occurred_at,
            },
            room_id: self.room_id.clone(),
            kind,
        };
        self.uncommitted_events.push(event);
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The room this session runs in.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session reached `Ended`.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }

    /// Options consulted by the latest round start.
    #[must_use]
    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    /// The session's scoreboard.
    #[must_use]
    pub fn scoreboard(&self) -> &dyn ScoringStrategy {
        self.scoreboard.as_ref()
    }

    /// The current or most recent round of the current attempt.
    #[must_use]
    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Rounds created so far.
    #[must_use]
    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    /// Distinct players whose guesses were evaluated.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// The participating players, sorted by id.
    #[must_use]
    pub fn participants(&self) -> Vec<PlayerId> {
        let mut participants: Vec<PlayerId> = self.participants.iter().cloned().collect();
        participants.sort();
        participants
    }

    /// When the session was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time of the latest correct guess, or creation.
    #[must_use]
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    /// Number of the latest round start.
    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Stream faults since the last round that ended any other way.
    #[must_use]
    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    /// Events recorded since the last drain.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[GameEvent] {
        &self.uncommitted_events
    }

    /// Drains the recorded events.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.uncommitted_events)
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn count_f64(count: usize) -> f64 {
    count as f64
}
