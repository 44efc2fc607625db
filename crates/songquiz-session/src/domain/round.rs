//! A single question cycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use songquiz_core::options::GuessMode;
use songquiz_core::ports::SelectedSong;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Canonical comparison form of a guess or answer: diacritics stripped,
/// lower-cased, whitespace collapsed to single spaces.
#[must_use]
pub fn normalize(text: &str) -> String {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One round: the song being played and the answers it accepts.
#[derive(Debug, Clone)]
pub struct Round {
    answer: String,
    artist: String,
    media_ref: String,
    accepted_answers: HashSet<String>,
    accepted_artist: String,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl Round {
    /// Creates a round for `song`. The primary answer and every alias are
    /// stored in normalized form.
    #[must_use]
    pub fn new(song: SelectedSong, started_at: DateTime<Utc>) -> Self {
        let mut accepted_answers: HashSet<String> =
            song.aliases.iter().map(|alias| normalize(alias)).collect();
        accepted_answers.insert(normalize(&song.name));
        accepted_answers.remove("");

        Self {
            accepted_artist: normalize(&song.artist),
            answer: song.name,
            artist: song.artist,
            media_ref: song.media_ref,
            accepted_answers,
            started_at,
            finished: false,
        }
    }

    /// Whether `text` answers this round under `mode`. Does not finish the
    /// round.
    #[must_use]
    pub fn check_guess(&self, text: &str, mode: GuessMode) -> bool {
        let guess = normalize(text);
        if guess.is_empty() {
            return false;
        }
        match mode {
            GuessMode::Song => self.accepted_answers.contains(&guess),
            GuessMode::Artist => guess == self.accepted_artist,
        }
    }

    /// Marks the round finished. Returns `true` only for the call that
    /// actually flipped the flag; later calls are no-ops returning `false`.
    pub fn finish(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        true
    }

    /// Whether the round has been resolved.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Restarts the latency clock when audio actually begins.
    pub fn begin_playback(&mut self, at: DateTime<Utc>) {
        self.started_at = at;
    }

    /// The song title as stored in the catalog.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// The performing artist.
    #[must_use]
    pub fn artist(&self) -> &str {
        &self.artist
    }

    /// Media reference handed to the player.
    #[must_use]
    pub fn media_ref(&self) -> &str {
        &self.media_ref
    }

    /// When the round (or its playback) started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
