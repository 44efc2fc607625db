//! Process-wide map from room to its live session.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use songquiz_core::ids::RoomId;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::session::Session;

/// Shared handle to one session. Clones refer to the same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    room_id: RoomId,
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            id: session.id(),
            room_id: session.room_id().clone(),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// The session's identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The room the session runs in.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Locks the session for a state transition.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }
}

/// Sessions keyed by room. At most one session per room.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<RoomId, SessionHandle>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the room's session, if one is live.
    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<SessionHandle> {
        self.sessions.get(room_id).map(|entry| entry.value().clone())
    }

    /// Returns the room's session, creating it with `create` if absent. The
    /// flag is `true` when a session was created.
    pub fn get_or_create(
        &self,
        room_id: &RoomId,
        create: impl FnOnce() -> Session,
    ) -> (SessionHandle, bool) {
        match self.sessions.entry(room_id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let handle = SessionHandle::new(create());
                entry.insert(handle.clone());
                (handle, true)
            }
        }
    }

    /// Removes the room's entry if it still belongs to `session_id`. A newer
    /// session in the same room is left alone.
    pub fn remove(&self, room_id: &RoomId, session_id: Uuid) -> bool {
        self.sessions
            .remove_if(room_id, |_, handle| handle.id == session_id)
            .is_some()
    }

    /// Handles to every live session.
    #[must_use]
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
