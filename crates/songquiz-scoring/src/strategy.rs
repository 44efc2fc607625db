//! The scoring-strategy interface shared by both scoreboards.

use std::fmt;

use serde::Serialize;
use songquiz_core::ids::{Player, PlayerId};
use songquiz_core::options::ScoringMode;

use crate::cumulative::CumulativeScoreboard;
use crate::elimination::EliminationScoreboard;

/// A correct guess credited when a round resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessResult {
    /// The guesser.
    pub player: Player,
    /// Points awarded for the guess.
    pub points_earned: u32,
    /// Experience awarded for the guess.
    pub exp_gain: u32,
}

/// One row of a scoreboard snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// The tracked player.
    pub player: Player,
    /// Accumulated points (always 0 on an elimination board).
    pub score: u32,
    /// Remaining lives; `None` on a cumulative board.
    pub lives: Option<u32>,
    /// Accumulated experience.
    pub exp: u32,
}

/// Operations a session needs from its scoreboard, independent of mode.
pub trait ScoringStrategy: Send + Sync + fmt::Debug {
    /// The mode this board implements.
    fn mode(&self) -> ScoringMode;

    /// Starts tracking `player` if not tracked yet. Cumulative boards track
    /// lazily and ignore this.
    fn enroll(&mut self, player: &Player);

    /// Whether `player_id` may still guess.
    fn can_guess(&self, player_id: &PlayerId) -> bool;

    /// Applies one round's correct guesses.
    fn record_round(&mut self, results: &[GuessResult]);

    /// Applies a round that ended without any correct guess.
    fn record_unanswered_round(&mut self);

    /// Players currently in first place, in tracking order.
    fn leaders(&self) -> Vec<Standing>;

    /// Whether the game is over under this board's rules.
    fn game_finished(&self, goal: Option<u32>) -> bool;

    /// Every tracked player, in tracking order.
    fn standings(&self) -> Vec<Standing>;

    /// Whether no player is tracked.
    fn is_empty(&self) -> bool;
}

/// Builds the scoreboard for `mode`.
#[must_use]
pub fn strategy_for(mode: ScoringMode, starting_lives: u32) -> Box<dyn ScoringStrategy> {
    match mode {
        ScoringMode::Cumulative => Box::new(CumulativeScoreboard::new()),
        ScoringMode::Elimination => Box::new(EliminationScoreboard::new(starting_lives)),
    }
}
