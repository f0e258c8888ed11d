//! Per-connection session

use crate::lobby::Match;
use crate::protocol::ProtocolState;
use codex_core::{ConnectionId, LobbyId};
use codex_net::Link;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

/// Mutable part of a session, guarded by the session's own lock
pub struct SessionState {
    pub protocol: ProtocolState,
    /// Lobby joined while in `InLobby`
    pub lobby: Option<LobbyId>,
    /// Match played while in `InMatch`
    pub game: Option<Arc<Match>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            protocol: ProtocolState::AwaitingName,
            lobby: None,
            game: None,
        }
    }
}

impl SessionState {
    /// Back to lobby selection, forgetting lobby and match
    pub fn choose_lobby(&mut self) {
        self.protocol = ProtocolState::ChoosingLobby;
        self.lobby = None;
        self.game = None;
    }

    pub fn enter_lobby(&mut self, id: LobbyId) {
        self.protocol = ProtocolState::InLobby;
        self.lobby = Some(id);
        self.game = None;
    }

    pub fn enter_match(&mut self, game: Arc<Match>) {
        self.protocol = ProtocolState::InMatch;
        self.lobby = None;
        self.game = Some(game);
    }
}

/// Server-side state for one connected client
pub struct Session {
    id: ConnectionId,
    name: OnceLock<String>,
    link: Arc<Link>,
    state: Mutex<SessionState>,
    pruned: AtomicBool,
}

impl Session {
    pub fn new(id: ConnectionId, link: Arc<Link>) -> Self {
        Self {
            id,
            name: OnceLock::new(),
            link,
            state: Mutex::new(SessionState::default()),
            pruned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Player name, once accepted
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Set the name; it never changes afterwards. Returns false if already set.
    pub(crate) fn assign_name(&self, name: &str) -> bool {
        self.name.set(name.to_string()).is_ok()
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn state(&self) -> &Mutex<SessionState> {
        &self.state
    }

    /// Claim the teardown of this session. Only the first call returns true.
    pub(crate) fn begin_prune(&self) -> bool {
        !self.pruned.swap(true, Ordering::SeqCst)
    }

    pub async fn protocol(&self) -> ProtocolState {
        self.state.lock().await.protocol
    }

    /// Name for logs
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => format!("{} ({})", name, self.id),
            None => self.id.to_string(),
        }
    }
}
