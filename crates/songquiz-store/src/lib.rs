//! `PostgreSQL` adapters for the song quiz engine.
//!
//! Tables are created by the workspace `migrations/`.

pub mod pg_persistence_store;
pub mod pg_song_selector;

pub use pg_persistence_store::PgPersistenceStore;
pub use pg_song_selector::PgSongSelector;
