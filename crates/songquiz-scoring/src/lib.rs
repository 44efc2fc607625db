//! Song Quiz — scoring strategies.
//!
//! Two interchangeable scoreboards behind one small [`ScoringStrategy`]
//! interface: a cumulative points board and a lives-based elimination
//! board. A session picks one at creation via [`strategy_for`].

pub mod cumulative;
pub mod elimination;
pub mod strategy;

pub use cumulative::{CumulativeScoreboard, ScoreboardEntry};
pub use elimination::{EliminationEntry, EliminationScoreboard};
pub use strategy::{GuessResult, ScoringStrategy, Standing, strategy_for};
