//! Stub voice connector.

use std::sync::Mutex;

use async_trait::async_trait;
use songquiz_core::error::GameError;
use songquiz_core::ids::RoomId;
use songquiz_core::ports::{ConnectionHandle, VoiceConnector};

/// Connects instantly (or always fails) and records disconnects.
#[derive(Debug)]
pub struct StubVoiceConnector {
    fail: bool,
    disconnects: Mutex<Vec<RoomId>>,
}

impl StubVoiceConnector {
    /// A connector whose connections always succeed.
    #[must_use]
    pub fn connected() -> Self {
        Self {
            fail: false,
            disconnects: Mutex::new(Vec::new()),
        }
    }

    /// A connector whose connections always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            disconnects: Mutex::new(Vec::new()),
        }
    }

    /// Rooms disconnected so far, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn disconnects(&self) -> Vec<RoomId> {
        self.disconnects.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceConnector for StubVoiceConnector {
    async fn ensure_connection(&self, room_id: &RoomId) -> Result<ConnectionHandle, GameError> {
        if self.fail {
            return Err(GameError::Connection("no voice channel".into()));
        }
        Ok(ConnectionHandle {
            room_id: room_id.clone(),
            channel_id: format!("voice-{room_id}"),
        })
    }

    async fn disconnect(&self, room_id: &RoomId) {
        self.disconnects.lock().unwrap().push(room_id.clone());
    }
}
