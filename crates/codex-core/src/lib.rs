//! # codex-core
//!
//! Core types shared by every Codex Online crate.
//!
//! This crate provides the foundational vocabulary of the session layer:
//! - Connection and lobby identifiers
//! - Message kinds, tagged messages and wire frames
//! - Refusals (application-level negative results) and transport errors
//! - Player/lobby name, capacity and chat validation
//! - Network timing configuration

pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod validation;

pub use config::{NetConfig, TransportKind};
pub use error::{CodexError, Refusal, Result};
pub use ids::{ConnectionId, LobbyId};
pub use message::{
    DrawSource, Field, Frame, GameState, LobbySummary, MatchStatus, Message, MessageKind, Position,
};
