//! Shared test doubles for the song quiz engine.

mod catalog;
mod clock;
mod media;
mod rng;
mod store;
mod voice;

pub use catalog::ScriptedSongSelector;
pub use clock::FixedClock;
pub use media::{PlayRecord, ScriptedMediaPlayer};
pub use rng::{MockRng, SequenceRng};
pub use store::{FailingStore, RecordingStore, StalledStore};
pub use voice::StubVoiceConnector;
