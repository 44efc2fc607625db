//! Domain error types.

use thiserror::Error;

use crate::ids::{PlayerId, RoomId};

/// Top-level error type for the quiz engine.
///
/// `SongQuery` is recovered locally (the session stays alive), `Connection`
/// is fatal to the session, `StreamFault` is recovered by starting a new
/// round, and `Persistence` is logged but never propagated into the session
/// state machine.
#[derive(Debug, Error)]
pub enum GameError {
    /// A round is already being started or played in this room.
    #[error("game already in session in room {0}")]
    AlreadyInSession(RoomId),

    /// No session exists for the room.
    #[error("no active session in room {0}")]
    SessionNotFound(RoomId),

    /// The session has already ended.
    #[error("session in room {0} has already ended")]
    SessionEnded(RoomId),

    /// The player has no recorded statistics.
    #[error("no statistics recorded for player {0}")]
    PlayerNotFound(PlayerId),

    /// Song selection produced no match or failed.
    #[error("song query error: {0}")]
    SongQuery(String),

    /// The voice channel could not be joined or held.
    #[error("connection error: {0}")]
    Connection(String),

    /// Playback failed mid-round.
    #[error("stream fault: {0}")]
    StreamFault(String),

    /// A statistics or options write/read failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A command was malformed or not applicable.
    #[error("validation error: {0}")]
    Validation(String),
}
