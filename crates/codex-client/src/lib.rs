//! Codex Online client endpoint
//!
//! [`CodexClient`] wraps a [`Link`] with one typed call per request kind.
//! Replies are matched by the correlator; everything else the server
//! pushes (lobby updates, turn changes, chat) is queued for
//! [`CodexClient::next_event`].

use async_trait::async_trait;
use codex_core::{
    CodexError, DrawSource, LobbyId, LobbySummary, Message, MessageKind, NetConfig, Position,
    Result, TransportKind,
};
use codex_net::{Link, Reactor};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::debug;

/// Queues push events; the queue closes when the connection does
struct EventSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

#[async_trait]
impl Reactor for EventSink {
    async fn react(&self, msg: Message) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            if tx.send(msg).is_err() {
                debug!("Event dropped, client is gone");
            }
        }
        Ok(())
    }

    async fn disconnected(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Client for a Codex Online server
pub struct CodexClient {
    link: Arc<Link>,
    events: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
}

impl CodexClient {
    /// Connect and start the listener loop
    pub async fn connect(host: &str, port: u16, kind: TransportKind, config: NetConfig) -> Result<Self> {
        let transport = codex_net::connect(host, port, kind, config).await?;
        let link = Arc::new(Link::new(transport));
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(EventSink {
            tx: Mutex::new(Some(tx)),
        });
        codex_net::spawn_listener(link.clone(), sink);
        debug!("Connected to {}", link.peer());
        Ok(Self {
            link,
            events: AsyncMutex::new(rx),
        })
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Next pushed event, or `None` once the connection is gone
    pub async fn next_event(&self) -> Option<Message> {
        self.events.lock().await.recv().await
    }

    /// Next pushed event of the given kind, skipping others
    pub async fn next_event_of(&self, kind: MessageKind) -> Option<Message> {
        loop {
            let event = self.next_event().await?;
            if event.kind == kind {
                return Some(event);
            }
        }
    }

    async fn request(&self, request: Message, accepted: &[MessageKind]) -> Result<Message> {
        let reply = self.link.send_and_wait(request, accepted).await?;
        match reply.kind {
            MessageKind::UnknownError => {
                let detail = reply.optional_text(0)?.unwrap_or("unknown error").to_string();
                Err(CodexError::RemoteError(detail))
            }
            MessageKind::NameRejected
            | MessageKind::LobbyRefused
            | MessageKind::StartRefused
            | MessageKind::ActionRefused => Err(CodexError::Refused(reply.refusal(0)?.clone())),
            _ => Ok(reply),
        }
    }

    async fn action(&self, request: Message) -> Result<()> {
        self.request(
            request,
            &[MessageKind::ActionAccepted, MessageKind::ActionRefused],
        )
        .await
        .map(|_| ())
    }

    /// Claim a player name. May resume a match the name was disconnected from.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.request(
            Message::unary(MessageKind::SetName, name),
            &[MessageKind::NameAccepted, MessageKind::NameRejected],
        )
        .await
        .map(|_| ())
    }

    pub async fn list_lobbies(&self, joinable_only: bool) -> Result<Vec<LobbySummary>> {
        let reply = self
            .request(
                Message::unary(MessageKind::ListLobbies, joinable_only),
                &[MessageKind::LobbyList],
            )
            .await?;
        Ok(reply.lobbies(0)?.to_vec())
    }

    pub async fn create_lobby(&self, name: &str, capacity: i64) -> Result<LobbySummary> {
        let reply = self
            .request(
                Message::binary(MessageKind::CreateLobby, name, capacity),
                &[MessageKind::LobbyJoined, MessageKind::LobbyRefused],
            )
            .await?;
        Ok(reply.lobby(0)?.clone())
    }

    pub async fn join_lobby(&self, id: LobbyId) -> Result<LobbySummary> {
        let raw = i64::try_from(id.0).map_err(|_| CodexError::ProtocolError(format!("{} out of range", id)))?;
        let reply = self
            .request(
                Message::unary(MessageKind::JoinLobby, raw),
                &[MessageKind::LobbyJoined, MessageKind::LobbyRefused],
            )
            .await?;
        Ok(reply.lobby(0)?.clone())
    }

    /// Leave the lobby. Refused with `LobbyOngoing` once the lobby started.
    pub async fn exit_lobby(&self) -> Result<()> {
        self.request(
            Message::new(MessageKind::ExitLobby),
            &[MessageKind::LobbyExited, MessageKind::LobbyRefused],
        )
        .await
        .map(|_| ())
    }

    /// Start the lobby; returns the turn order
    pub async fn start_lobby(&self) -> Result<Vec<String>> {
        let reply = self
            .request(
                Message::new(MessageKind::StartLobby),
                &[MessageKind::MatchStarted, MessageKind::StartRefused],
            )
            .await?;
        Ok(reply.names(0)?.to_vec())
    }

    pub async fn choose_setup(&self, starter_face_up: bool, goal: i64) -> Result<()> {
        self.action(Message::binary(MessageKind::ChooseSetup, starter_face_up, goal))
            .await
    }

    pub async fn place_card(&self, hand_slot: i64, position: Position, face_up: bool) -> Result<()> {
        self.action(Message::ternary(
            MessageKind::PlaceCard,
            hand_slot,
            position,
            face_up,
        ))
        .await
    }

    pub async fn draw_card(&self, source: DrawSource) -> Result<()> {
        self.action(Message::unary(MessageKind::DrawCard, source)).await
    }

    pub async fn chat(&self, text: &str) -> Result<()> {
        self.action(Message::unary(MessageKind::Chat, text)).await
    }

    pub async fn exit_match(&self) -> Result<()> {
        self.request(Message::new(MessageKind::ExitMatch), &[MessageKind::MatchExited])
            .await
            .map(|_| ())
    }

    /// Say goodbye and close the connection
    pub async fn disconnect(&self) {
        if let Err(e) = self.link.send(Message::new(MessageKind::Disconnect)).await {
            debug!("Disconnect notice not sent: {}", e);
        }
        self.link.close().await;
    }

    /// Close the connection without notice
    pub async fn close(&self) {
        self.link.close().await;
    }
}

/// Turn order carried by `MatchStarted` or `MatchResumed`
pub fn turn_order(event: &Message) -> Result<Vec<String>> {
    match event.kind {
        MessageKind::MatchStarted | MessageKind::MatchResumed => Ok(event.names(0)?.to_vec()),
        other => Err(CodexError::ProtocolError(format!("{} carries no turn order", other))),
    }
}
