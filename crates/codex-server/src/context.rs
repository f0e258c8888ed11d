//! Shared server context
//!
//! Constructed once by the process entry point and handed to every
//! connection. All outbound traffic goes through [`ServerContext::send_to`]
//! so a failed send always ends in a prune.

use crate::flow::FlowEvent;
use crate::lobby::{Departure, LobbyRegistry, Match};
use crate::registry::SessionRegistry;
use crate::rules::RulesFactory;
use crate::session::Session;
use codex_core::config::DEFAULT_PORT;
use codex_core::{ConnectionId, GameState, LobbyId, Message, MessageKind, NetConfig, Refusal, TransportKind};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Server settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub transport: TransportKind,
    pub net: NetConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            transport: TransportKind::Stream,
            net: NetConfig::default(),
        }
    }
}

pub struct ServerContext {
    pub config: ServerConfig,
    pub sessions: SessionRegistry,
    pub lobbies: LobbyRegistry,
}

impl ServerContext {
    pub fn new(config: ServerConfig, rules: RulesFactory) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: SessionRegistry::new(),
            lobbies: LobbyRegistry::new(rules),
        })
    }

    /// Send to one session; a failure prunes it in the background
    pub async fn send_to(self: &Arc<Self>, session: &Session, msg: Message) -> bool {
        let kind = msg.kind;
        match session.link().send(msg).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Send of {} to {} failed: {}", kind, session.label(), e);
                tokio::spawn(self.prune(session.id()));
                false
            }
        }
    }

    /// Send a copy of `msg` to every named player that has a session
    pub async fn send_to_names(self: &Arc<Self>, names: &[String], msg: &Message) {
        for session in self.sessions.by_names(names).await {
            self.send_to(&session, msg.clone()).await;
        }
    }

    /// Broadcast flow events to the match's connected players, announcing
    /// the winner when the game ends
    pub async fn publish_flow(self: &Arc<Self>, game: &Match, events: Vec<FlowEvent>) {
        if events.is_empty() {
            return;
        }
        let mut game_over = None;
        let recipients = {
            let mut flow = game.flow().lock().await;
            if events.contains(&FlowEvent::StateChanged(GameState::PostGame)) {
                game_over = Some(flow.take_winner());
            }
            flow.connected_players()
        };

        for event in events {
            let msg = match event {
                FlowEvent::TurnChanged { player, turn } => {
                    Message::binary(MessageKind::TurnChanged, player, i64::from(turn))
                }
                FlowEvent::StateChanged(state) => Message::unary(MessageKind::GameStateChanged, state),
                FlowEvent::IdleChanged(idle) => Message::unary(MessageKind::IdleChanged, idle),
            };
            self.send_to_names(&recipients, &msg).await;
        }

        match game_over {
            Some(Ok(winner)) => {
                info!("{} is over, winner: {:?}", game.id(), winner);
                let msg = match winner {
                    Some(name) => Message::unary(MessageKind::GameOver, name),
                    None => Message::new(MessageKind::GameOver),
                };
                self.send_to_names(&recipients, &msg).await;
            }
            Some(Err(refusal)) => debug!("{}: winner already announced ({})", game.id(), refusal),
            None => {}
        }
    }

    /// Announce a departure from a match and publish what it caused
    pub async fn publish_departure(self: &Arc<Self>, game: &Match, name: &str, departure: Departure) {
        let notice = Message::unary(MessageKind::PlayerDisconnected, name);
        self.send_to_names(&departure.remaining, &notice).await;
        if !departure.deleted {
            self.publish_flow(game, departure.events).await;
        }
    }

    /// Silent, idempotent teardown of a session.
    ///
    /// Only the first caller for an id does the work: it closes the link
    /// (waking any blocked waiter), removes the player from their lobby or
    /// match and only then drops the session, so the name is never free
    /// while the match still counts its owner as connected. Boxed because
    /// pruning sends, and a failed send prunes.
    pub fn prune(self: &Arc<Self>, id: ConnectionId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let ctx = self.clone();
        Box::pin(async move { ctx.prune_session(id).await })
    }

    async fn prune_session(self: &Arc<Self>, id: ConnectionId) {
        let Some(session) = self.sessions.lookup_by_id(id).await else {
            debug!("{} already pruned", id);
            return;
        };
        if !session.begin_prune() {
            debug!("{} is already being pruned", id);
            return;
        }
        session.link().close().await;

        let (lobby, game) = {
            let mut state = session.state().lock().await;
            let lobby = state.lobby.take();
            let game = state.game.take();
            (lobby, game)
        };

        if let Some(name) = session.name() {
            if let Some(game) = game {
                self.leave_match(&game, name).await;
            } else if let Some(lobby) = lobby {
                self.leave_lobby(lobby, name).await;
            }
        }
        self.sessions.remove(id).await;
        info!("Pruned {}", session.label());
    }

    async fn leave_match(self: &Arc<Self>, game: &Match, name: &str) {
        match self.lobbies.leave_match(game, name, false).await {
            Ok(departure) => self.publish_departure(game, name, departure).await,
            Err(refusal) => debug!("{} leaving {}: {}", name, game.id(), refusal),
        }
    }

    async fn leave_lobby(self: &Arc<Self>, lobby: LobbyId, name: &str) {
        match self.lobbies.exit_lobby(lobby, name).await {
            Ok(Some(summary)) => {
                let members = summary.members.clone();
                let update = Message::unary(MessageKind::LobbyUpdated, summary);
                self.send_to_names(&members, &update).await;
            }
            Ok(None) => {}
            Err(Refusal::LobbyOngoing) => {
                // Started while this session was still being moved in
                if let Some(game) = self.lobbies.match_by_id(lobby).await {
                    self.leave_match(&game, name).await;
                }
            }
            Err(refusal) => warn!("{} leaving {}: {}", name, lobby, refusal),
        }
    }
}
