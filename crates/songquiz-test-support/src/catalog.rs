//! Scripted song catalog.

use std::sync::Mutex;

use async_trait::async_trait;
use songquiz_core::error::GameError;
use songquiz_core::options::SongFilter;
use songquiz_core::ports::{SelectedSong, SongSelector};

/// Hands out a fixed list of songs round-robin and counts how often it was
/// asked. An empty list behaves like a catalog with no matching songs.
#[derive(Debug, Default)]
pub struct ScriptedSongSelector {
    songs: Vec<SelectedSong>,
    calls: Mutex<usize>,
}

impl ScriptedSongSelector {
    /// Creates a selector cycling through `songs`.
    #[must_use]
    pub fn new(songs: Vec<SelectedSong>) -> Self {
        Self {
            songs,
            calls: Mutex::new(0),
        }
    }

    /// Creates a selector that never finds a song.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of selections made so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SongSelector for ScriptedSongSelector {
    async fn select_random_song(
        &self,
        _filter: &SongFilter,
    ) -> Result<Option<SelectedSong>, GameError> {
        let mut calls = self.calls.lock().unwrap();
        let pick = if self.songs.is_empty() {
            None
        } else {
            Some(self.songs[*calls % self.songs.len()].clone())
        };
        *calls += 1;
        Ok(pick)
    }
}
