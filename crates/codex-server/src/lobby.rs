//! Lobby and match registry
//!
//! Lobbies are guarded individually; the registry maps only guard the
//! id → lobby and id → match tables. Every operation re-checks its
//! preconditions under the lobby's own lock, because sessions race.

use crate::flow::{FlowEvent, FlowResult, GameFlow};
use crate::rules::RulesFactory;
use codex_core::validation::{is_valid_capacity, is_valid_lobby_name};
use codex_core::{LobbyId, LobbySummary, Refusal};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// A pre-match group of players
#[derive(Debug)]
pub struct Lobby {
    id: LobbyId,
    name: String,
    capacity: u8,
    master: String,
    members: Vec<String>,
    ongoing: bool,
}

impl Lobby {
    fn new(id: LobbyId, name: String, capacity: u8, creator: String) -> Self {
        Self {
            id,
            name,
            capacity,
            master: creator.clone(),
            members: vec![creator],
            ongoing: false,
        }
    }

    pub fn summary(&self) -> LobbySummary {
        LobbySummary {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            master: self.master.clone(),
            members: self.members.clone(),
            ongoing: self.ongoing,
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= usize::from(self.capacity)
    }

    /// Removed lobbies are left empty
    fn is_gone(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove a member, reassigning the master uniformly at random among
    /// the remaining members. Returns false if `name` was not a member.
    fn remove(&mut self, name: &str) -> bool {
        let Some(index) = self.members.iter().position(|m| m == name) else {
            return false;
        };
        self.members.remove(index);
        if self.master == name {
            if let Some(next) = self.members.choose(&mut rand::thread_rng()) {
                info!("{} is the new master of {}", next, self.id);
                self.master = next.clone();
            }
        }
        true
    }
}

/// A running match; shares its lobby's id
pub struct Match {
    id: LobbyId,
    flow: Mutex<GameFlow>,
}

impl Match {
    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn flow(&self) -> &Mutex<GameFlow> {
        &self.flow
    }
}

/// Outcome of a player leaving a match
#[derive(Debug)]
pub struct Departure {
    pub events: Vec<FlowEvent>,
    /// Connected players after the departure
    pub remaining: Vec<String>,
    /// The match was deleted because nobody is connected
    pub deleted: bool,
}

pub struct LobbyRegistry {
    lobbies: RwLock<HashMap<LobbyId, Arc<Mutex<Lobby>>>>,
    matches: RwLock<HashMap<LobbyId, Arc<Match>>>,
    next_id: AtomicU64,
    rules: RulesFactory,
}

impl LobbyRegistry {
    pub fn new(rules: RulesFactory) -> Self {
        Self {
            lobbies: RwLock::new(HashMap::new()),
            matches: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            rules,
        }
    }

    /// Create a lobby with `creator` as its master and only member
    pub async fn create(&self, name: &str, capacity: i64, creator: &str) -> FlowResult<LobbySummary> {
        if !is_valid_lobby_name(name) {
            return Err(Refusal::InvalidLobbyName);
        }
        if !is_valid_capacity(capacity) {
            return Err(Refusal::InvalidCapacity);
        }
        let capacity = u8::try_from(capacity).map_err(|_| Refusal::InvalidCapacity)?;
        let id = LobbyId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let lobby = Lobby::new(id, name.to_string(), capacity, creator.to_string());
        let summary = lobby.summary();
        self.lobbies
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(lobby)));
        info!("{} created {} ({}) for {} players", creator, id, name, capacity);
        Ok(summary)
    }

    async fn lobby(&self, id: LobbyId) -> FlowResult<Arc<Mutex<Lobby>>> {
        self.lobbies
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Refusal::LobbyNotFound)
    }

    pub async fn join(&self, id: LobbyId, name: &str) -> FlowResult<LobbySummary> {
        let lobby = self.lobby(id).await?;
        let mut lobby = lobby.lock().await;
        if lobby.is_gone() {
            return Err(Refusal::LobbyNotFound);
        }
        if lobby.ongoing {
            return Err(Refusal::LobbyOngoing);
        }
        if lobby.members.iter().any(|m| m == name) {
            return Err(Refusal::AlreadyJoined);
        }
        if lobby.is_full() {
            return Err(Refusal::LobbyFull);
        }
        lobby.members.push(name.to_string());
        debug!("{} joined {}", name, id);
        Ok(lobby.summary())
    }

    /// All lobbies by id; optionally only those that can still be joined
    pub async fn list(&self, joinable_only: bool) -> Vec<LobbySummary> {
        let lobbies: Vec<Arc<Mutex<Lobby>>> = self.lobbies.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(lobbies.len());
        for lobby in lobbies {
            let lobby = lobby.lock().await;
            if lobby.is_gone() || (joinable_only && (lobby.ongoing || lobby.is_full())) {
                continue;
            }
            summaries.push(lobby.summary());
        }
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    pub async fn summary(&self, id: LobbyId) -> Option<LobbySummary> {
        let lobby = self.lobby(id).await.ok()?;
        let lobby = lobby.lock().await;
        (!lobby.is_gone()).then(|| lobby.summary())
    }

    /// Leave a lobby that has not started.
    ///
    /// Returns the remaining lobby, or `None` when the lobby was emptied
    /// and deleted.
    pub async fn exit_lobby(&self, id: LobbyId, name: &str) -> FlowResult<Option<LobbySummary>> {
        let lobby = self.lobby(id).await?;
        let mut guard = lobby.lock().await;
        if guard.ongoing {
            return Err(Refusal::LobbyOngoing);
        }
        if !guard.remove(name) {
            return Err(Refusal::LobbyNotFound);
        }
        if guard.is_gone() {
            drop(guard);
            self.lobbies.write().await.remove(&id);
            info!("{} is empty, deleted", id);
            return Ok(None);
        }
        Ok(Some(guard.summary()))
    }

    /// Start the lobby as a match. Only the master may start, and only
    /// with at least two members. Turn order is join order.
    pub async fn start(&self, id: LobbyId, requester: &str) -> FlowResult<Arc<Match>> {
        let lobby = self.lobby(id).await?;
        let mut lobby = lobby.lock().await;
        if lobby.is_gone() {
            return Err(Refusal::LobbyNotFound);
        }
        if lobby.ongoing {
            return Err(Refusal::LobbyOngoing);
        }
        if lobby.master != requester {
            return Err(Refusal::NotMaster);
        }
        if lobby.members.len() < 2 {
            return Err(Refusal::TooFewPlayers);
        }
        lobby.ongoing = true;

        let players = lobby.members.clone();
        let rules = (self.rules)(&players);
        let game = Arc::new(Match {
            id,
            flow: Mutex::new(GameFlow::new(players.clone(), rules)),
        });
        self.matches.write().await.insert(id, game.clone());
        info!("{} started with {:?}", id, players);
        Ok(game)
    }

    pub async fn match_by_id(&self, id: LobbyId) -> Option<Arc<Match>> {
        self.matches.read().await.get(&id).cloned()
    }

    /// The match in which `name` is disconnected and may come back
    pub async fn find_reconnectable(&self, name: &str) -> Option<Arc<Match>> {
        let matches: Vec<Arc<Match>> = self.matches.read().await.values().cloned().collect();
        for game in matches {
            if game.flow.lock().await.can_reconnect(name) {
                return Some(game);
            }
        }
        None
    }

    /// Mark a player disconnected (or, if `permanent`, departed) and delete
    /// the match and its lobby once nobody is connected
    pub async fn leave_match(&self, game: &Match, name: &str, permanent: bool) -> FlowResult<Departure> {
        let (events, remaining) = {
            let mut flow = game.flow.lock().await;
            let events = if permanent {
                flow.depart_player(name)?
            } else {
                flow.disconnect_player(name)?
            };
            (events, flow.connected_players())
        };

        if permanent {
            if let Ok(lobby) = self.lobby(game.id).await {
                lobby.lock().await.remove(name);
            }
        }

        let deleted = remaining.is_empty() && self.remove_match(game.id).await;
        Ok(Departure {
            events,
            remaining,
            deleted,
        })
    }

    async fn remove_match(&self, id: LobbyId) -> bool {
        let removed = self.matches.write().await.remove(&id).is_some();
        let lobby = self.lobbies.write().await.remove(&id);
        if let Some(lobby) = lobby {
            lobby.lock().await.members.clear();
        }
        if removed {
            info!("{} has no connected players, deleted", id);
        }
        removed
    }

    pub async fn lobby_count(&self) -> usize {
        self.lobbies.read().await.len()
    }

    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }
}
