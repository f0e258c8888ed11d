//! Messages and wire frames
//!
//! Every frame is either a payload-free heartbeat or a [`Message`]: a
//! [`MessageKind`] tag plus zero to three typed fields. The session layer
//! treats field contents as opaque; only handlers look inside.

use crate::error::{CodexError, Refusal, Result};
use crate::ids::LobbyId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every message kind understood by client and server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MessageKind {
    // === Client -> Server ===
    /// SetName(name)
    SetName,
    ListLobbies,
    /// CreateLobby(name, capacity)
    CreateLobby,
    /// JoinLobby(lobbyId)
    JoinLobby,
    ExitLobby,
    StartLobby,
    /// ChooseSetup(starterFaceUp, goalIndex)
    ChooseSetup,
    /// PlaceCard(handSlot, position, faceUp)
    PlaceCard,
    /// DrawCard(source)
    DrawCard,
    /// Chat(text)
    Chat,
    ExitMatch,
    Disconnect,

    // === Server -> Client replies ===
    NameAccepted,
    /// NameRejected(refusal)
    NameRejected,
    /// LobbyList(summaries)
    LobbyList,
    /// LobbyJoined(summary)
    LobbyJoined,
    /// LobbyRefused(refusal)
    LobbyRefused,
    LobbyExited,
    /// StartRefused(refusal)
    StartRefused,
    ActionAccepted,
    /// ActionRefused(refusal)
    ActionRefused,
    MatchExited,
    /// UnknownError(detail)
    UnknownError,

    // === Server -> Client events ===
    /// LobbyUpdated(summary)
    LobbyUpdated,
    /// MatchStarted(turnOrder)
    MatchStarted,
    /// MatchResumed(turnOrder, status)
    MatchResumed,
    /// TurnChanged(player, turn)
    TurnChanged,
    /// GameStateChanged(state)
    GameStateChanged,
    /// PlayerDisconnected(name)
    PlayerDisconnected,
    /// PlayerReconnected(name)
    PlayerReconnected,
    /// IdleChanged(idle)
    IdleChanged,
    /// ChatMessage(from, text)
    ChatMessage,
    /// GameOver(winner?) - no field means tie or unfinished game
    GameOver,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase of a running match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GameState {
    Setting,
    Playing,
    LastRound,
    PostGame,
}

/// Placement coordinates on a player's board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Where a drawn card comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DrawSource {
    /// Top of the covered deck
    Deck,
    /// One of the face-up cards
    Market(u8),
}

/// Lobby as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LobbySummary {
    pub id: LobbyId,
    pub name: String,
    pub capacity: u8,
    pub master: String,
    /// Join order, which is also the turn order once started
    pub members: Vec<String>,
    pub ongoing: bool,
}

impl LobbySummary {
    pub fn is_full(&self) -> bool {
        self.members.len() >= usize::from(self.capacity)
    }
}

/// Where a resumed match stands, sent to a player who reconnects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchStatus {
    pub current: String,
    pub turn: u32,
    pub state: GameState,
    pub idle: bool,
    /// The current player has placed and still has to draw
    pub awaiting_draw: bool,
}

/// One typed payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Field {
    Text(String),
    Int(i64),
    Flag(bool),
    Names(Vec<String>),
    Lobby(LobbySummary),
    Lobbies(Vec<LobbySummary>),
    Refusal(Refusal),
    Position(Position),
    State(GameState),
    Source(DrawSource),
    Status(MatchStatus),
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Text(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Text(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Field::Int(value)
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Flag(value)
    }
}

impl From<Refusal> for Field {
    fn from(value: Refusal) -> Self {
        Field::Refusal(value)
    }
}

impl From<LobbySummary> for Field {
    fn from(value: LobbySummary) -> Self {
        Field::Lobby(value)
    }
}

impl From<Position> for Field {
    fn from(value: Position) -> Self {
        Field::Position(value)
    }
}

impl From<GameState> for Field {
    fn from(value: GameState) -> Self {
        Field::State(value)
    }
}

impl From<MatchStatus> for Field {
    fn from(value: MatchStatus) -> Self {
        Field::Status(value)
    }
}

impl From<DrawSource> for Field {
    fn from(value: DrawSource) -> Self {
        Field::Source(value)
    }
}

/// Fixed-shape payload: at most three fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Payload {
    #[default]
    Empty,
    One(Field),
    Two(Field, Field),
    Three(Field, Field, Field),
}

/// A discriminated message: kind tag plus payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Payload,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Payload::Empty,
        }
    }

    pub fn unary(kind: MessageKind, a: impl Into<Field>) -> Self {
        Self {
            kind,
            payload: Payload::One(a.into()),
        }
    }

    pub fn binary(kind: MessageKind, a: impl Into<Field>, b: impl Into<Field>) -> Self {
        Self {
            kind,
            payload: Payload::Two(a.into(), b.into()),
        }
    }

    pub fn ternary(
        kind: MessageKind,
        a: impl Into<Field>,
        b: impl Into<Field>,
        c: impl Into<Field>,
    ) -> Self {
        Self {
            kind,
            payload: Payload::Three(a.into(), b.into(), c.into()),
        }
    }

    /// Field at `index`, if the payload has one there
    pub fn field(&self, index: usize) -> Option<&Field> {
        match (&self.payload, index) {
            (Payload::One(a), 0) | (Payload::Two(a, _), 0) | (Payload::Three(a, _, _), 0) => {
                Some(a)
            }
            (Payload::Two(_, b), 1) | (Payload::Three(_, b, _), 1) => Some(b),
            (Payload::Three(_, _, c), 2) => Some(c),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self.payload {
            Payload::Empty => 0,
            Payload::One(_) => 1,
            Payload::Two(..) => 2,
            Payload::Three(..) => 3,
        }
    }

    fn typed_field<'a, T>(
        &'a self,
        index: usize,
        what: &str,
        pick: impl FnOnce(&'a Field) -> Option<T>,
    ) -> Result<T> {
        self.field(index).and_then(pick).ok_or_else(|| {
            CodexError::ProtocolError(format!(
                "{} expects {} at field {}",
                self.kind, what, index
            ))
        })
    }

    pub fn text(&self, index: usize) -> Result<&str> {
        self.typed_field(index, "text", |f| match f {
            Field::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Text at `index`, or `None` when the payload is too short
    pub fn optional_text(&self, index: usize) -> Result<Option<&str>> {
        match self.field(index) {
            None => Ok(None),
            Some(_) => self.text(index).map(Some),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64> {
        self.typed_field(index, "an integer", |f| match f {
            Field::Int(n) => Some(*n),
            _ => None,
        })
    }

    pub fn flag(&self, index: usize) -> Result<bool> {
        self.typed_field(index, "a flag", |f| match f {
            Field::Flag(b) => Some(*b),
            _ => None,
        })
    }

    pub fn names(&self, index: usize) -> Result<&[String]> {
        self.typed_field(index, "a name list", |f| match f {
            Field::Names(names) => Some(names.as_slice()),
            _ => None,
        })
    }

    pub fn lobby(&self, index: usize) -> Result<&LobbySummary> {
        self.typed_field(index, "a lobby", |f| match f {
            Field::Lobby(lobby) => Some(lobby),
            _ => None,
        })
    }

    pub fn lobbies(&self, index: usize) -> Result<&[LobbySummary]> {
        self.typed_field(index, "a lobby list", |f| match f {
            Field::Lobbies(lobbies) => Some(lobbies.as_slice()),
            _ => None,
        })
    }

    pub fn refusal(&self, index: usize) -> Result<&Refusal> {
        self.typed_field(index, "a refusal", |f| match f {
            Field::Refusal(refusal) => Some(refusal),
            _ => None,
        })
    }

    pub fn position(&self, index: usize) -> Result<Position> {
        self.typed_field(index, "a position", |f| match f {
            Field::Position(p) => Some(*p),
            _ => None,
        })
    }

    pub fn state(&self, index: usize) -> Result<GameState> {
        self.typed_field(index, "a game state", |f| match f {
            Field::State(s) => Some(*s),
            _ => None,
        })
    }

    pub fn source(&self, index: usize) -> Result<DrawSource> {
        self.typed_field(index, "a draw source", |f| match f {
            Field::Source(s) => Some(*s),
            _ => None,
        })
    }

    pub fn status(&self, index: usize) -> Result<&MatchStatus> {
        self.typed_field(index, "a match status", |f| match f {
            Field::Status(s) => Some(s),
            _ => None,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.arity())
    }
}

/// Unit of transfer on every transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Frame {
    /// Liveness-only signal
    Heartbeat,
    Message(Message),
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        Frame::Message(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_access_by_index() {
        let msg = Message::ternary(
            MessageKind::PlaceCard,
            1i64,
            Position::new(1, -1),
            true,
        );
        assert_eq!(msg.arity(), 3);
        assert_eq!(msg.int(0).unwrap(), 1);
        assert_eq!(msg.position(1).unwrap(), Position::new(1, -1));
        assert!(msg.flag(2).unwrap());
        assert!(msg.field(3).is_none());
    }

    #[test]
    fn test_wrong_field_type_is_protocol_error() {
        let msg = Message::unary(MessageKind::SetName, 42i64);
        match msg.text(0) {
            Err(CodexError::ProtocolError(detail)) => {
                assert!(detail.contains("SetName"));
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
        assert!(msg.text(1).is_err());
    }

    #[test]
    fn test_optional_text() {
        let tie = Message::new(MessageKind::GameOver);
        assert_eq!(tie.optional_text(0).unwrap(), None);
        let won = Message::unary(MessageKind::GameOver, "alice");
        assert_eq!(won.optional_text(0).unwrap(), Some("alice"));
    }

    #[test]
    fn test_frame_format() {
        let json = serde_json::to_string(&Frame::Heartbeat).unwrap();
        assert_eq!(json, r#""Heartbeat""#);

        let frame = Frame::Message(Message::unary(MessageKind::Chat, "hi"));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""Kind":"Chat""#));
        let decoded: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_missing_payload_defaults_to_empty() {
        let msg: Message = serde_json::from_str(r#"{"Kind":"ListLobbies"}"#).unwrap();
        assert_eq!(msg, Message::new(MessageKind::ListLobbies));
    }

    #[test]
    fn test_resume_status_survives_the_wire() {
        let status = MatchStatus {
            current: "bob".into(),
            turn: 7,
            state: GameState::LastRound,
            idle: true,
            awaiting_draw: true,
        };
        let msg = Message::binary(
            MessageKind::MatchResumed,
            Field::Names(vec!["alice".into(), "bob".into()]),
            status.clone(),
        );
        let json = serde_json::to_string(&Frame::Message(msg)).unwrap();
        assert!(json.contains(r#""AwaitingDraw":true"#));
        let Frame::Message(decoded) = serde_json::from_str::<Frame>(&json).unwrap() else {
            panic!("expected a message frame");
        };
        assert_eq!(decoded.status(1).unwrap(), &status);
        assert!(decoded.status(0).is_err());
    }

    #[test]
    fn test_lobby_full() {
        let mut lobby = LobbySummary {
            id: LobbyId(1),
            name: "table".into(),
            capacity: 2,
            master: "alice".into(),
            members: vec!["alice".into()],
            ongoing: false,
        };
        assert!(!lobby.is_full());
        lobby.members.push("bob".into());
        assert!(lobby.is_full());
    }
}
