//! Commands accepted by the session engine.

use songquiz_core::command::Command;
use songquiz_core::ids::{Player, RoomId};
use songquiz_core::options::GuessMode;
use uuid::Uuid;

use super::session::RoundEndReason;

/// Command to start a round, creating the room's session if needed.
#[derive(Debug, Clone)]
pub struct StartRound {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The room to play in.
    pub room_id: RoomId,
    /// Players present in the voice channel. Seeds the elimination board.
    pub roster: Vec<Player>,
}

impl Command for StartRound {
    fn command_type(&self) -> &'static str {
        "session.start_round"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}

/// Command to evaluate a chat message as a guess.
#[derive(Debug, Clone)]
pub struct SubmitGuess {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The room the message was sent in.
    pub room_id: RoomId,
    /// The author of the message.
    pub player: Player,
    /// Raw message text.
    pub text: String,
    /// Overrides the room's configured guess mode.
    pub mode: Option<GuessMode>,
}

impl Command for SubmitGuess {
    fn command_type(&self) -> &'static str {
        "session.submit_guess"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}

/// Command to end the current round on request (skip or stop).
#[derive(Debug, Clone)]
pub struct EndRound {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The room whose round ends.
    pub room_id: RoomId,
    /// Why the round ends. Only [`RoundEndReason::Skipped`] and
    /// [`RoundEndReason::Stopped`] may be requested.
    pub reason: RoundEndReason,
}

impl Command for EndRound {
    fn command_type(&self) -> &'static str {
        "session.end_round"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}

/// Command to end the room's session.
#[derive(Debug, Clone)]
pub struct EndSession {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The room whose session ends.
    pub room_id: RoomId,
}

impl Command for EndSession {
    fn command_type(&self) -> &'static str {
        "session.end_session"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}

/// Command reporting a change in voice-channel membership.
#[derive(Debug, Clone)]
pub struct UpdateVoicePresence {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The room whose voice channel changed.
    pub room_id: RoomId,
    /// Non-bot members still in the channel.
    pub humans_remaining: u32,
}

impl Command for UpdateVoicePresence {
    fn command_type(&self) -> &'static str {
        "session.update_voice_presence"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}
