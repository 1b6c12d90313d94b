//! Per-realm registry of connected sessions.
//!
//! Each realm owns one registry. Registries are mutated concurrently from
//! the accept path, the disconnect path, and map-transition logic, so all
//! storage is sharded concurrent maps: operations on unrelated sessions
//! never contend on a shared lock, and readers never observe a session
//! mid-insertion.

use super::{CharacterId, EntityHandle, Session, SessionId};
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent table of the sessions currently held by one realm.
///
/// A session belongs to exactly one registry at a time. Moving a session
/// between realms is a remove-then-add performed by the gameplay layer and
/// is not atomic across realms: callers must tolerate a session being
/// briefly absent from every registry during a transition.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Primary table, keyed by the server-assigned session id
    sessions: DashMap<SessionId, Arc<Session>>,

    /// Character id -> session id index, populated for bound sessions
    by_character: DashMap<CharacterId, SessionId>,

    /// Network handle -> session id index, populated for bound sessions
    by_handle: DashMap<EntityHandle, SessionId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, indexing its character id and handle when a
    /// character is already bound.
    pub fn add(&self, session: Arc<Session>) {
        if let Some(binding) = session.binding() {
            self.by_character.insert(binding.character_id, session.id());
            self.by_handle.insert(binding.handle, session.id());
        }
        self.sessions.insert(session.id(), session);
    }

    /// Removes a session by id, cleaning up any index entries that still
    /// point at it. Returns the removed session, if it was present.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&id)?;
        self.by_character.retain(|_, v| *v != id);
        self.by_handle.retain(|_, v| *v != id);
        Some(session)
    }

    /// Looks up a session by the persistent id of its bound character.
    pub fn find_by_id(&self, character_id: CharacterId) -> Option<Arc<Session>> {
        let id = *self.by_character.get(&character_id)?;
        self.sessions.get(&id).map(|s| s.value().clone())
    }

    /// Looks up a session by its bound character's name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.iter().find_map(|entry| {
            let matches = entry
                .binding()
                .is_some_and(|b| b.name.eq_ignore_ascii_case(name));
            matches.then(|| entry.value().clone())
        })
    }

    /// Looks up a session by its bound character's network handle.
    pub fn find_by_handle(&self, handle: EntityHandle) -> Option<Arc<Session>> {
        let id = *self.by_handle.get(&handle)?;
        self.sessions.get(&id).map(|s| s.value().clone())
    }

    /// Looks up a session by handle within a specific channel, optionally
    /// excluding one character (typically the requester itself).
    pub fn find_by_handle_in_channel(
        &self,
        handle: EntityHandle,
        channel: u8,
        excluding: Option<CharacterId>,
    ) -> Option<Arc<Session>> {
        let session = self.find_by_handle(handle)?;
        let binding = session.binding()?;
        if binding.channel != channel {
            return None;
        }
        if excluding.is_some_and(|id| id == binding.character_id) {
            return None;
        }
        Some(session)
    }

    /// Number of sessions currently held.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session with this id is currently held.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Snapshot of every held session, for broadcast fan-out.
    ///
    /// Cloned `Arc`s keep fan-out independent of registry mutation: a
    /// session removed mid-broadcast still receives (or fails) its send
    /// without affecting other recipients.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
