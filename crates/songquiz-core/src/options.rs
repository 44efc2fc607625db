//! Per-room game options.
//!
//! Options are persisted as a JSON blob per room. Loading is lenient: missing
//! keys take their defaults and unknown keys are dropped, and the caller is
//! told when the stored blob needs to be rewritten.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of lives in elimination mode.
pub const DEFAULT_STARTING_LIVES: u32 = 10;

/// Where in the track playback begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekType {
    /// Play from the start of the track.
    #[default]
    Beginning,
    /// Play from a random point in the first 60% of the track.
    Random,
}

/// What a guess is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuessMode {
    /// Guess the song title (or one of its aliases).
    #[default]
    Song,
    /// Guess the performing artist.
    Artist,
}

/// Scoring strategy selected once at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Points accumulate; an optional goal ends the game.
    #[default]
    Cumulative,
    /// Players lose lives on rounds they miss; last survivor wins.
    Elimination,
}

/// Artist gender filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    /// Male artists.
    Male,
    /// Female artists.
    Female,
    /// Mixed-gender groups.
    Coed,
}

impl Gender {
    /// Catalog column value for this gender.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Coed => "coed",
        }
    }
}

/// Filter handed to the song selector. Empty lists and `None` bounds are
/// unrestricted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SongFilter {
    /// Earliest release year (inclusive).
    pub beginning_year: Option<i32>,
    /// Latest release year (inclusive).
    pub end_year: Option<i32>,
    /// Allowed artist genders.
    pub genders: Vec<Gender>,
    /// Only songs by these artist groups.
    pub group_ids: Vec<i64>,
    /// Never songs by these artist groups.
    pub excluded_group_ids: Vec<i64>,
    /// Restrict selection to the N most popular matching songs.
    pub limit: Option<u32>,
}

/// Game options for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    /// Score that ends a cumulative game.
    pub goal: Option<u32>,
    /// Seconds a round may run before auto-advancing.
    pub guess_timeout_secs: Option<u64>,
    /// Playback seek strategy.
    pub seek_type: SeekType,
    /// What guesses are compared against.
    pub guess_mode: GuessMode,
    /// Scoring strategy for new sessions.
    pub scoring_mode: ScoringMode,
    /// Lives each player starts with in elimination mode.
    pub starting_lives: u32,
    /// Song selection filter.
    pub filter: SongFilter,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            goal: None,
            guess_timeout_secs: None,
            seek_type: SeekType::default(),
            guess_mode: GuessMode::default(),
            scoring_mode: ScoringMode::default(),
            starting_lives: DEFAULT_STARTING_LIVES,
            filter: SongFilter::default(),
        }
    }
}

/// Options decoded from a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedOptions {
    /// The decoded options.
    pub options: RoomOptions,
    /// Whether the stored blob differs from `options` and should be rewritten.
    pub repaired: bool,
}

impl RoomOptions {
    /// Decodes a stored options blob key by key. Missing keys and keys whose
    /// values fail to decode take their defaults, unknown keys are dropped,
    /// and every valid key is kept. A blob that is not an object yields the
    /// defaults.
    #[must_use]
    pub fn from_blob(blob: &serde_json::Value) -> LoadedOptions {
        let Some(stored) = blob.as_object() else {
            return LoadedOptions {
                options: RoomOptions::default(),
                repaired: true,
            };
        };

        let mut stored = stored.clone();
        if let Some(Value::Object(filter)) = stored.get("filter") {
            let filter = merge_valid_keys(filter, &SongFilter::default());
            stored.insert("filter".to_owned(), filter);
        }

        let options: RoomOptions =
            serde_json::from_value(merge_valid_keys(&stored, &RoomOptions::default()))
                .unwrap_or_default();
        let repaired = options.to_blob() != *blob;
        LoadedOptions { options, repaired }
    }

    /// Encodes the options as a JSON blob.
    #[must_use]
    pub fn to_blob(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Whether a goal is configured.
    #[must_use]
    pub fn is_goal_set(&self) -> bool {
        self.goal.is_some()
    }

    /// The guess timeout, if one is configured. A zero timeout disables it.
    #[must_use]
    pub fn guess_timeout(&self) -> Option<Duration> {
        self.guess_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Overlays each stored key onto the encoded `defaults`, keeping a key only
/// if the result still decodes as `T`.
fn merge_valid_keys<T>(stored: &Map<String, Value>, defaults: &T) -> Value
where
    T: Serialize + DeserializeOwned,
{
    let Ok(Value::Object(mut merged)) = serde_json::to_value(defaults) else {
        return Value::Null;
    };

    let keys: Vec<String> = merged.keys().cloned().collect();
    for key in keys {
        let Some(candidate) = stored.get(&key) else {
            continue;
        };
        let Some(previous) = merged.insert(key.clone(), candidate.clone()) else {
            continue;
        };
        if serde_json::from_value::<T>(Value::Object(merged.clone())).is_err() {
            merged.insert(key, previous);
        }
    }

    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_no_goal_and_no_timeout() {
        let options = RoomOptions::default();

        assert!(!options.is_goal_set());
        assert_eq!(options.guess_timeout(), None);
        assert_eq!(options.starting_lives, DEFAULT_STARTING_LIVES);
        assert_eq!(options.scoring_mode, ScoringMode::Cumulative);
    }

    #[test]
    fn test_from_blob_fills_missing_keys_and_flags_repair() {
        let blob = serde_json::json!({ "goal": 5 });

        let loaded = RoomOptions::from_blob(&blob);

        assert_eq!(loaded.options.goal, Some(5));
        assert_eq!(loaded.options.seek_type, SeekType::Beginning);
        assert!(loaded.repaired);
    }

    #[test]
    fn test_from_blob_drops_unknown_keys() {
        let mut blob = RoomOptions::default().to_blob();
        blob["bot_prefix"] = serde_json::json!("!");

        let loaded = RoomOptions::from_blob(&blob);

        assert_eq!(loaded.options, RoomOptions::default());
        assert!(loaded.repaired);
        assert!(loaded.options.to_blob().get("bot_prefix").is_none());
    }

    #[test]
    fn test_from_blob_accepts_complete_blob_without_repair() {
        let options = RoomOptions {
            goal: Some(10),
            guess_timeout_secs: Some(20),
            seek_type: SeekType::Random,
            guess_mode: GuessMode::Artist,
            scoring_mode: ScoringMode::Elimination,
            starting_lives: 3,
            filter: SongFilter {
                genders: vec![Gender::Female],
                ..SongFilter::default()
            },
        };

        let loaded = RoomOptions::from_blob(&options.to_blob());

        assert_eq!(loaded.options, options);
        assert!(!loaded.repaired);
    }

    #[test]
    fn test_from_blob_resets_only_the_mistyped_key() {
        // Arrange
        let blob = serde_json::json!({
            "goal": 25,
            "scoring_mode": "elimination",
            "starting_lives": 3,
            "guess_timeout_secs": "30",
        });

        // Act
        let loaded = RoomOptions::from_blob(&blob);

        // Assert
        assert_eq!(loaded.options.goal, Some(25));
        assert_eq!(loaded.options.scoring_mode, ScoringMode::Elimination);
        assert_eq!(loaded.options.starting_lives, 3);
        assert_eq!(loaded.options.guess_timeout_secs, None);
        assert!(loaded.repaired);
    }

    #[test]
    fn test_from_blob_repairs_inside_the_filter() {
        let blob = serde_json::json!({
            "goal": 7,
            "filter": { "beginning_year": 2010, "genders": "female" },
        });

        let loaded = RoomOptions::from_blob(&blob);

        assert_eq!(loaded.options.goal, Some(7));
        assert_eq!(loaded.options.filter.beginning_year, Some(2010));
        assert!(loaded.options.filter.genders.is_empty());
        assert!(loaded.repaired);
    }

    #[test]
    fn test_from_blob_falls_back_to_defaults_for_non_object() {
        let loaded = RoomOptions::from_blob(&serde_json::json!(["goal", 5]));

        assert_eq!(loaded.options, RoomOptions::default());
        assert!(loaded.repaired);
    }

    #[test]
    fn test_zero_guess_timeout_is_disabled() {
        let options = RoomOptions {
            guess_timeout_secs: Some(0),
            ..RoomOptions::default()
        };

        assert_eq!(options.guess_timeout(), None);
    }
}
