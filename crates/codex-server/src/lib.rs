//! # codex-server
//!
//! Session and lobby server for Codex Online.
//!
//! This crate provides:
//! - `SessionRegistry` for connection ids, names and per-session state
//! - `LobbyRegistry` for lobbies and the matches started from them
//! - `GameFlow` for turn order, phases and end-of-game detection
//! - The protocol state machine and its message handlers
//! - `RulesEngine` with a small reference engine (`Tally`)

pub mod context;
pub mod flow;
pub mod handlers;
pub mod lobby;
pub mod protocol;
pub mod registry;
pub mod rules;
pub mod session;

pub use context::{ServerConfig, ServerContext};
pub use flow::{FlowEvent, GameFlow, TurnPhase};
pub use lobby::{LobbyRegistry, Match};
pub use protocol::ProtocolState;
pub use registry::SessionRegistry;
pub use rules::{RulesEngine, RulesFactory, Tally, tally_factory};
pub use session::Session;

use async_trait::async_trait;
use codex_core::{CodexError, ConnectionId, LobbySummary, Message, Result, TransportKind};
use codex_net::{Link, LivenessChecker, Reactor, RemoteTransport, StreamTransport, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Binds one session to the listener loop of its connection
struct SessionReactor {
    ctx: Arc<ServerContext>,
    session: Arc<Session>,
}

#[async_trait]
impl Reactor for SessionReactor {
    async fn react(&self, msg: Message) -> Result<()> {
        handlers::dispatch(&self.ctx, &self.session, msg).await
    }

    async fn disconnected(&self) {
        debug!("{} disconnected", self.session.label());
        self.ctx.prune(self.session.id()).await;
    }
}

/// Codex Online server
pub struct CodexServer {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    checker: Option<Arc<LivenessChecker>>,
}

impl CodexServer {
    /// Bind the listening socket. Port 0 picks an ephemeral port.
    pub async fn bind(config: ServerConfig, rules: RulesFactory) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|e| CodexError::BindFailed(format!("port {}: {}", config.port, e)))?;
        let checker = match config.transport {
            TransportKind::Stream => None,
            TransportKind::Remote => Some(LivenessChecker::spawn(config.net.liveness_check_interval)),
        };
        Ok(Self {
            ctx: ServerContext::new(config, rules),
            listener,
            checker,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| CodexError::BindFailed(e.to_string()))
    }

    /// Administrative handle, usable while the server runs
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: self.ctx.clone(),
        }
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        info!(
            "Codex server listening on {} ({:?} transport)",
            self.local_addr()?,
            self.ctx.config.transport
        );

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };

            let net = self.ctx.config.net;
            let transport: Arc<dyn Transport> = match &self.checker {
                Some(checker) => {
                    let remote: Arc<dyn Transport> =
                        RemoteTransport::accept(stream, net, checker.clone()).await;
                    remote
                }
                None => StreamTransport::accept(stream, net).await,
            };
            let link = Arc::new(Link::new(transport));
            let session = self.ctx.sessions.create(link.clone()).await;
            info!("Accepted {} from {}", session.id(), addr);

            let reactor = Arc::new(SessionReactor {
                ctx: self.ctx.clone(),
                session,
            });
            codex_net::spawn_listener(link, reactor);
        }
    }

    /// Run the accept loop on its own task
    pub fn spawn(self) -> (ServerHandle, JoinHandle<Result<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }
}

/// Administrative operations on a running server
#[derive(Clone)]
pub struct ServerHandle {
    ctx: Arc<ServerContext>,
}

impl ServerHandle {
    /// Forcibly disconnect a session. Returns false if it was not connected.
    pub async fn kick(&self, id: ConnectionId) -> bool {
        if self.ctx.sessions.lookup_by_id(id).await.is_none() {
            return false;
        }
        info!("Kicking {}", id);
        self.ctx.prune(id).await;
        true
    }

    pub async fn session_count(&self) -> usize {
        self.ctx.sessions.count().await
    }

    pub async fn session_ids(&self) -> Vec<ConnectionId> {
        self.ctx.sessions.ids().await
    }

    /// Every lobby, started or not
    pub async fn lobbies(&self) -> Vec<LobbySummary> {
        self.ctx.lobbies.list(false).await
    }

    pub async fn match_count(&self) -> usize {
        self.ctx.lobbies.match_count().await
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }
}
