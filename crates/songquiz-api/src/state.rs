//! Shared application state.

use std::sync::Arc;

use songquiz_core::clock::Clock;
use songquiz_core::ports::{PersistenceStore, SongSelector};
use songquiz_core::rng::DeterministicRng;
use songquiz_session::application::command_handlers::{Collaborators, EngineSettings, GameEngine};
use songquiz_session::application::options::RoomOptionsCache;

use crate::bridge::{BridgeMediaPlayer, BridgeVoiceConnector};

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The session engine.
    pub engine: GameEngine,
    /// Voice channels announced by the bridge.
    pub voice: Arc<BridgeVoiceConnector>,
    /// Playbacks handed to the bridge.
    pub media: Arc<BridgeMediaPlayer>,
}

impl AppState {
    /// Create new application state around bridge-backed voice and media.
    #[must_use]
    pub fn new(
        songs: Arc<dyn SongSelector>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
        settings: EngineSettings,
    ) -> Self {
        let voice = Arc::new(BridgeVoiceConnector::new());
        let media = Arc::new(BridgeMediaPlayer::new());
        let options = Arc::new(RoomOptionsCache::new(Arc::clone(&store)));
        let engine = GameEngine::new(
            Collaborators {
                songs,
                voice: voice.clone(),
                media: media.clone(),
                store,
                clock,
                rng,
            },
            options,
            settings,
        );
        Self {
            engine,
            voice,
            media,
        }
    }
}
