//! Read-mostly cache of per-room options.

use std::sync::Arc;

use dashmap::DashMap;
use songquiz_core::error::GameError;
use songquiz_core::ids::RoomId;
use songquiz_core::options::RoomOptions;
use songquiz_core::ports::PersistenceStore;
use tracing::{debug, warn};

/// Serves room options to sessions, loading them from the store on first
/// use. Only [`RoomOptionsCache::update`] mutates cached options.
pub struct RoomOptionsCache {
    store: Arc<dyn PersistenceStore>,
    cache: DashMap<RoomId, RoomOptions>,
}

impl std::fmt::Debug for RoomOptionsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomOptionsCache")
            .field("cached_rooms", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl RoomOptionsCache {
    /// Creates an empty cache backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Returns the room's options. A stored blob that needed repair is
    /// written back; a store failure yields the defaults without caching
    /// them.
    pub async fn get(&self, room_id: &RoomId) -> RoomOptions {
        if let Some(options) = self.cache.get(room_id) {
            return options.value().clone();
        }

        let options = match self.store.load_room_options(room_id).await {
            Ok(Some(blob)) => {
                let loaded = RoomOptions::from_blob(&blob);
                if loaded.repaired {
                    debug!(%room_id, "repairing stored room options");
                    if let Err(e) = self
                        .store
                        .save_room_options(room_id, &loaded.options.to_blob())
                        .await
                    {
                        warn!(%room_id, error = %e, "failed to write repaired room options");
                    }
                }
                loaded.options
            }
            Ok(None) => RoomOptions::default(),
            Err(e) => {
                warn!(%room_id, error = %e, "failed to load room options; using defaults");
                return RoomOptions::default();
            }
        };

        self.cache.insert(room_id.clone(), options.clone());
        options
    }

    /// Validates, persists and caches new options for the room.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` for inconsistent options and
    /// `GameError::Persistence` if the store rejects the write.
    pub async fn update(
        &self,
        room_id: &RoomId,
        options: RoomOptions,
    ) -> Result<RoomOptions, GameError> {
        validate(&options)?;
        self.store
            .save_room_options(room_id, &options.to_blob())
            .await?;
        self.cache.insert(room_id.clone(), options.clone());
        Ok(options)
    }
}

fn validate(options: &RoomOptions) -> Result<(), GameError> {
    if options.starting_lives == 0 {
        return Err(GameError::Validation(
            "starting lives must be at least 1".to_owned(),
        ));
    }
    if options.goal == Some(0) {
        return Err(GameError::Validation("goal must be at least 1".to_owned()));
    }
    if let (Some(begin), Some(end)) = (options.filter.beginning_year, options.filter.end_year)
        && begin > end
    {
        return Err(GameError::Validation(format!(
            "beginning year {begin} is after end year {end}"
        )));
    }
    if options.filter.limit == Some(0) {
        return Err(GameError::Validation("limit must be at least 1".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use songquiz_core::options::{ScoringMode, SeekType};
    use songquiz_test_support::{FailingStore, RecordingStore};

    #[tokio::test]
    async fn test_get_returns_defaults_for_unknown_room() {
        let store = Arc::new(RecordingStore::new());
        let cache = RoomOptionsCache::new(store.clone());

        let options = cache.get(&RoomId::new("guild-1")).await;

        assert_eq!(options, RoomOptions::default());
        assert!(store.saved_options().is_empty());
    }

    #[tokio::test]
    async fn test_get_repairs_incomplete_blob() {
        // Arrange
        let store = Arc::new(RecordingStore::new());
        let room = RoomId::new("guild-1");
        store.seed_options(&room, serde_json::json!({ "seek_type": "random" }));
        let cache = RoomOptionsCache::new(store.clone());

        // Act
        let options = cache.get(&room).await;

        // Assert
        assert_eq!(options.seek_type, SeekType::Random);
        let saved = store.saved_options();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1, options.to_blob());
    }

    #[tokio::test]
    async fn test_get_keeps_valid_keys_when_one_is_mistyped() {
        // Arrange
        let store = Arc::new(RecordingStore::new());
        let room = RoomId::new("guild-1");
        store.seed_options(
            &room,
            serde_json::json!({
                "goal": 25,
                "scoring_mode": "elimination",
                "starting_lives": 3,
                "guess_timeout_secs": "30",
            }),
        );
        let cache = RoomOptionsCache::new(store.clone());

        // Act
        let options = cache.get(&room).await;

        // Assert
        assert_eq!(options.goal, Some(25));
        assert_eq!(options.scoring_mode, ScoringMode::Elimination);
        assert_eq!(options.starting_lives, 3);
        assert_eq!(options.guess_timeout_secs, None);
        let saved = store.saved_options();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1["goal"], serde_json::json!(25));
    }

    #[tokio::test]
    async fn test_get_serves_cached_options_without_reloading() {
        let store = Arc::new(RecordingStore::new());
        let room = RoomId::new("guild-1");
        let cache = RoomOptionsCache::new(store.clone());
        cache.get(&room).await;

        store.seed_options(&room, serde_json::json!({ "goal": 3 }));
        let options = cache.get(&room).await;

        assert_eq!(options.goal, None);
    }

    #[tokio::test]
    async fn test_get_falls_back_to_defaults_when_store_fails() {
        let cache = RoomOptionsCache::new(Arc::new(FailingStore));

        let options = cache.get(&RoomId::new("guild-1")).await;

        assert_eq!(options, RoomOptions::default());
    }

    #[tokio::test]
    async fn test_update_persists_and_caches() {
        // Arrange
        let store = Arc::new(RecordingStore::new());
        let room = RoomId::new("guild-1");
        let cache = RoomOptionsCache::new(store.clone());
        let options = RoomOptions {
            goal: Some(10),
            guess_timeout_secs: Some(20),
            ..RoomOptions::default()
        };

        // Act
        let result = cache.update(&room, options.clone()).await;

        // Assert
        assert_eq!(result.unwrap(), options);
        assert_eq!(cache.get(&room).await, options);
        assert_eq!(store.saved_options().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_inverted_year_range() {
        let store = Arc::new(RecordingStore::new());
        let cache = RoomOptionsCache::new(store.clone());
        let mut options = RoomOptions::default();
        options.filter.beginning_year = Some(2020);
        options.filter.end_year = Some(2010);

        let result = cache.update(&RoomId::new("guild-1"), options).await;

        assert!(matches!(result, Err(GameError::Validation(_))));
        assert!(store.saved_options().is_empty());
    }

    #[tokio::test]
    async fn test_update_surfaces_persistence_errors() {
        let cache = RoomOptionsCache::new(Arc::new(FailingStore));

        let result = cache
            .update(&RoomId::new("guild-1"), RoomOptions::default())
            .await;

        assert!(matches!(result, Err(GameError::Persistence(_))));
    }
}
