//! Error types for Codex Online

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Codex operations
pub type Result<T> = std::result::Result<T, CodexError>;

/// Codex error types
///
/// Every transport failure collapses into [`CodexError::ConnectionLost`];
/// callers never see granular I/O detail.
#[derive(Debug, Error)]
pub enum CodexError {
    /// The connection is dead (closed, timed out or failed mid-frame)
    #[error("Connection lost")]
    ConnectionLost,

    /// `connect` was called on a transport that already owns a connection
    #[error("Transport already reserved")]
    AlreadyReserved,

    /// The remote endpoint could not be reached
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The listening socket could not be bound
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// The peer answered with an application-level refusal
    #[error("Refused: {0}")]
    Refused(Refusal),

    /// The peer answered with a generic unknown-error reply
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// A message did not have the shape its kind requires
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CodexError {
    fn from(err: serde_json::Error) -> Self {
        CodexError::SerializationError(err.to_string())
    }
}

impl From<Refusal> for CodexError {
    fn from(refusal: Refusal) -> Self {
        CodexError::Refused(refusal)
    }
}

/// Application-level refusals.
///
/// These travel inside reply messages and never end a session.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Refusal {
    #[error("invalid name")]
    InvalidName,
    #[error("name already taken")]
    NameTaken,
    #[error("invalid lobby name")]
    InvalidLobbyName,
    #[error("lobby capacity must be between 2 and 4")]
    InvalidCapacity,
    #[error("lobby is full")]
    LobbyFull,
    #[error("already joined")]
    AlreadyJoined,
    #[error("lobby not found")]
    LobbyNotFound,
    #[error("lobby already started")]
    LobbyOngoing,
    #[error("only the lobby master can do that")]
    NotMaster,
    #[error("not enough players")]
    TooFewPlayers,
    #[error("not your turn")]
    NotYourTurn,
    #[error("match is idle")]
    MatchIdle,
    #[error("not allowed in the current game phase")]
    WrongPhase,
    #[error("invalid chat message")]
    InvalidChat,
    #[error("no game in progress")]
    NoActiveGame,
    #[error("not part of this match")]
    NotInMatch,
    #[error("invalid move: {0}")]
    InvalidMove(String),
}
