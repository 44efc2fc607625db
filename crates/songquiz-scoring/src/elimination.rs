//! Elimination scoreboard: players lose a life for every round they fail to
//! guess, and the last player standing wins.

use serde::Serialize;
use songquiz_core::ids::{Player, PlayerId};
use songquiz_core::options::ScoringMode;
use tracing::debug;

use crate::strategy::{GuessResult, ScoringStrategy, Standing};

/// A player's state on an elimination board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EliminationEntry {
    /// The tracked player.
    pub player: Player,
    /// Remaining lives; 0 means eliminated.
    pub lives: u32,
    /// Accumulated experience.
    pub exp: u32,
}

impl EliminationEntry {
    /// Whether the player has run out of lives.
    #[must_use]
    pub fn is_eliminated(&self) -> bool {
        self.lives == 0
    }

    fn lose_life(&mut self) {
        self.lives = self.lives.saturating_sub(1);
    }
}

/// Lives-based scoreboard. Players are tracked explicitly through
/// [`EliminationScoreboard::add_player`].
#[derive(Debug, Clone)]
pub struct EliminationScoreboard {
    starting_lives: u32,
    entries: Vec<EliminationEntry>,
    leaders: Vec<PlayerId>,
}

impl EliminationScoreboard {
    /// Creates an empty board whose players start with `starting_lives`.
    #[must_use]
    pub fn new(starting_lives: u32) -> Self {
        Self {
            starting_lives,
            entries: Vec::new(),
            leaders: Vec::new(),
        }
    }

    /// Lives a newly added player receives by default.
    #[must_use]
    pub fn starting_lives(&self) -> u32 {
        self.starting_lives
    }

    /// Tracks `player` with `lives` (or the starting lives). Re-adding a
    /// tracked player replaces their entry in place.
    pub fn add_player(&mut self, player: &Player, lives: Option<u32>) -> &EliminationEntry {
        let entry = EliminationEntry {
            player: player.clone(),
            lives: lives.unwrap_or(self.starting_lives),
            exp: 0,
        };
        let index = if let Some(index) = self.position(&player.id) {
            self.entries[index] = entry;
            index
        } else {
            self.entries.push(entry);
            self.entries.len() - 1
        };
        &self.entries[index]
    }

    /// Applies one round's correct guesses. Guessers gain experience and keep
    /// their lives; every other tracked player loses one life. A guesser who
    /// is not tracked yet joins with the lives of the weakest surviving
    /// player.
    pub fn update_scoreboard(&mut self, guess_results: &[GuessResult]) {
        for result in guess_results {
            if self.position(&result.player.id).is_none() {
                let lives = self.lives_of_weakest_player().unwrap_or(self.starting_lives);
                debug!(player_id = %result.player.id, lives, "late joiner added to elimination board");
                self.add_player(&result.player, Some(lives));
            }
        }

        for entry in &mut self.entries {
            match guess_results.iter().find(|r| r.player.id == entry.player.id) {
                Some(result) => entry.exp = entry.exp.saturating_add(result.exp_gain),
                None => entry.lose_life(),
            }
        }

        self.recompute_leaders();
    }

    /// Whether `player_id` is tracked and out of lives.
    #[must_use]
    pub fn is_player_eliminated(&self, player_id: &PlayerId) -> bool {
        self.entry(player_id).is_some_and(EliminationEntry::is_eliminated)
    }

    /// Removes one life from every tracked player.
    pub fn decrement_all_lives(&mut self) {
        for entry in &mut self.entries {
            entry.lose_life();
        }
        self.recompute_leaders();
    }

    /// Whether every player is eliminated, or exactly one survives in a game
    /// that tracked more than one player. A lone player who is still alive
    /// has not finished.
    #[must_use]
    pub fn game_finished(&self) -> bool {
        let survivors = self.entries.iter().filter(|e| !e.is_eliminated()).count();
        let all_eliminated = survivors == 0;
        let one_left = self.entries.len() > 1 && survivors == 1;
        all_eliminated || one_left
    }

    /// Fewest lives among players still alive, or `None` when nobody is.
    #[must_use]
    pub fn lives_of_weakest_player(&self) -> Option<u32> {
        self.entries
            .iter()
            .filter(|e| !e.is_eliminated())
            .map(|e| e.lives)
            .min()
    }

    /// Lives of `player_id`, if tracked.
    #[must_use]
    pub fn player_lives(&self, player_id: &PlayerId) -> Option<u32> {
        self.entry(player_id).map(|e| e.lives)
    }

    /// Experience of `player_id`, 0 if untracked.
    #[must_use]
    pub fn player_exp(&self, player_id: &PlayerId) -> u32 {
        self.entry(player_id).map_or(0, |e| e.exp)
    }

    /// Current leaders as of the last scoring update, in tracking order.
    /// Empty until the first update.
    #[must_use]
    pub fn winners(&self) -> Vec<&EliminationEntry> {
        self.leaders
            .iter()
            .filter_map(|id| self.entry(id))
            .collect()
    }

    /// All entries in tracking order.
    #[must_use]
    pub fn entries(&self) -> &[EliminationEntry] {
        &self.entries
    }

    /// Whether no player is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn recompute_leaders(&mut self) {
        let Some(max) = self.entries.iter().map(|e| e.lives).max() else {
            self.leaders.clear();
            return;
        };
        self.leaders = self
            .entries
            .iter()
            .filter(|e| e.lives == max)
            .map(|e| e.player.id.clone())
            .collect();
    }

    fn entry(&self, player_id: &PlayerId) -> Option<&EliminationEntry> {
        self.entries.iter().find(|e| &e.player.id == player_id)
    }

    fn position(&self, player_id: &PlayerId) -> Option<usize> {
        self.entries.iter().position(|e| &e.player.id == player_id)
    }
}

fn standing(entry: &EliminationEntry) -> Standing {
    Standing {
        player: entry.player.clone(),
        score: 0,
        lives: Some(entry.lives),
        exp: entry.exp,
    }
}

impl ScoringStrategy for EliminationScoreboard {
    fn mode(&self) -> ScoringMode {
        ScoringMode::Elimination
    }

    fn enroll(&mut self, player: &Player) {
        if self.position(&player.id).is_none() {
            self.add_player(player, None);
        }
    }

    fn can_guess(&self, player_id: &PlayerId) -> bool {
        !self.is_player_eliminated(player_id)
    }

    fn record_round(&mut self, results: &[GuessResult]) {
        self.update_scoreboard(results);
    }

    fn record_unanswered_round(&mut self) {
        self.decrement_all_lives();
    }

    fn leaders(&self) -> Vec<Standing> {
        self.winners().into_iter().map(standing).collect()
    }

    fn game_finished(&self, _goal: Option<u32>) -> bool {
        EliminationScoreboard::game_finished(self)
    }

    fn standings(&self) -> Vec<Standing> {
        self.entries.iter().map(standing).collect()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
