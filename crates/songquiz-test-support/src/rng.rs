//! Test RNG — deterministic `DeterministicRng` implementations for tests.

use songquiz_core::rng::DeterministicRng;

/// A no-op RNG that always returns `0.0`. Suitable for tests that do not
/// depend on specific random values.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_f64(&mut self) -> f64 {
        0.0
    }
}

/// An RNG that replays predetermined fractions. Panics if the sequence is
/// exhausted. Used where a test needs a specific seek offset.
#[derive(Debug, Default)]
pub struct SequenceRng {
    fractions: Vec<f64>,
    index: usize,
}

impl SequenceRng {
    /// Create a `SequenceRng` replaying `fractions` from `next_f64`.
    #[must_use]
    pub fn with_fractions(fractions: Vec<f64>) -> Self {
        Self {
            fractions,
            index: 0,
        }
    }
}

impl DeterministicRng for SequenceRng {
    fn next_f64(&mut self) -> f64 {
        let val = self.fractions[self.index];
        self.index += 1;
        val
    }
}
