//! Session registry
//!
//! Concurrent id -> session map. All lifecycle operations resolve
//! their target here first.

use crate::session::{DownloadSession, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Concurrent collection of live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<DownloadSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, replacing any previous entry with the same id
    pub fn insert(&self, session: Arc<DownloadSession>) {
        self.sessions.write().insert(session.id, session);
    }

    /// Look up a session by id
    pub fn get(&self, id: SessionId) -> Option<Arc<DownloadSession>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Whether a session with this id exists
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Remove and return a session
    pub fn remove(&self, id: SessionId) -> Option<Arc<DownloadSession>> {
        self.sessions.write().remove(&id)
    }

    /// Snapshot of all live sessions
    pub fn list(&self) -> Vec<Arc<DownloadSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
