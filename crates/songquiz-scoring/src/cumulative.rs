//! Cumulative scoreboard: points add up, highest score wins.

use serde::Serialize;
use songquiz_core::ids::{Player, PlayerId};
use songquiz_core::options::ScoringMode;

use crate::strategy::{GuessResult, ScoringStrategy, Standing};

/// A player's running totals on a cumulative board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreboardEntry {
    /// The scoring player.
    pub player: Player,
    /// Accumulated points.
    pub score: u32,
    /// Accumulated experience.
    pub exp: u32,
}

/// Points-based scoreboard. Entries are created on a player's first scoring
/// event and kept in creation order.
#[derive(Debug, Clone, Default)]
pub struct CumulativeScoreboard {
    entries: Vec<ScoreboardEntry>,
}

impl CumulativeScoreboard {
    /// Creates an empty scoreboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits `player` with `points_earned` and `exp_gain`, creating their
    /// entry on first use.
    pub fn update_scoreboard(&mut self, player: &Player, points_earned: u32, exp_gain: u32) {
        let index = match self.position(&player.id) {
            Some(index) => index,
            None => {
                self.entries.push(ScoreboardEntry {
                    player: player.clone(),
                    score: 0,
                    exp: 0,
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        entry.score = entry.score.saturating_add(points_earned);
        entry.exp = entry.exp.saturating_add(exp_gain);
    }

    /// Entries sharing the maximum score, in creation order. Empty when
    /// nobody has scored.
    #[must_use]
    pub fn winners(&self) -> Vec<&ScoreboardEntry> {
        let Some(max) = self.entries.iter().map(|e| e.score).max() else {
            return Vec::new();
        };
        self.entries.iter().filter(|e| e.score == max).collect()
    }

    /// Whether the leading score has reached `goal`. Always false without a
    /// goal or without any scorer.
    #[must_use]
    pub fn game_finished(&self, goal: Option<u32>) -> bool {
        let Some(goal) = goal else {
            return false;
        };
        self.winners().first().is_some_and(|leader| leader.score >= goal)
    }

    /// Points of `player_id`, 0 if they have not scored.
    #[must_use]
    pub fn player_score(&self, player_id: &PlayerId) -> u32 {
        self.entry(player_id).map_or(0, |e| e.score)
    }

    /// Experience of `player_id`, 0 if they have not scored.
    #[must_use]
    pub fn player_exp(&self, player_id: &PlayerId) -> u32 {
        self.entry(player_id).map_or(0, |e| e.exp)
    }

    /// All entries in creation order.
    #[must_use]
    pub fn entries(&self) -> &[ScoreboardEntry] {
        &self.entries
    }

    /// Whether nobody has scored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, player_id: &PlayerId) -> Option<&ScoreboardEntry> {
        self.entries.iter().find(|e| &e.player.id == player_id)
    }

    fn position(&self, player_id: &PlayerId) -> Option<usize> {
        self.entries.iter().position(|e| &e.player.id == player_id)
    }
}

fn standing(entry: &ScoreboardEntry) -> Standing {
    Standing {
        player: entry.player.clone(),
        score: entry.score,
        lives: None,
        exp: entry.exp,
    }
}

impl ScoringStrategy for CumulativeScoreboard {
    fn mode(&self) -> ScoringMode {
        ScoringMode::Cumulative
    }

    fn enroll(&mut self, _player: &Player) {}

    fn can_guess(&self, _player_id: &PlayerId) -> bool {
        true
    }

    fn record_round(&mut self, results: &[GuessResult]) {
        for result in results {
            self.update_scoreboard(&result.player, result.points_earned, result.exp_gain);
        }
    }

    fn record_unanswered_round(&mut self) {}

    fn leaders(&self) -> Vec<Standing> {
        self.winners().into_iter().map(standing).collect()
    }

    fn game_finished(&self, goal: Option<u32>) -> bool {
        CumulativeScoreboard::game_finished(self, goal)
    }

    fn standings(&self) -> Vec<Standing> {
        self.entries.iter().map(standing).collect()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
