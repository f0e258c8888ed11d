//! Session registry
//!
//! Maps connection ids to sessions. The registry lock guards only the map;
//! each session guards its own state.

use crate::session::Session;
use codex_core::validation::is_valid_name;
use codex_core::{ConnectionId, Refusal};
use codex_net::Link;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Registry of live sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Arc<Session>>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a session for a freshly accepted connection under a new id
    pub async fn create(&self, link: Arc<Link>) -> Arc<Session> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = Arc::new(Session::new(id, link));
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    pub async fn lookup_by_id(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn lookup_by_name(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .find(|session| session.name() == Some(name))
            .cloned()
    }

    pub async fn is_name_taken(&self, name: &str) -> bool {
        self.lookup_by_name(name).await.is_some()
    }

    /// Validate and claim a player name.
    ///
    /// Uniqueness is checked under the registry write lock so two sessions
    /// cannot claim the same name.
    pub async fn set_name(&self, id: ConnectionId, name: &str) -> Result<(), Refusal> {
        if !is_valid_name(name) {
            return Err(Refusal::InvalidName);
        }
        let sessions = self.sessions.write().await;
        let session = sessions.get(&id).ok_or(Refusal::InvalidName)?;
        if sessions.values().any(|other| other.name() == Some(name)) {
            return Err(Refusal::NameTaken);
        }
        if !session.assign_name(name) {
            return Err(Refusal::InvalidName);
        }
        Ok(())
    }

    /// Remove a session. Only the first caller for an id gets it back.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(&id)
    }

    /// Sessions for the given player names, skipping names with no session
    pub async fn by_names(&self, names: &[String]) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        names
            .iter()
            .filter_map(|name| {
                sessions
                    .values()
                    .find(|session| session.name() == Some(name.as_str()))
                    .cloned()
            })
            .collect()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
