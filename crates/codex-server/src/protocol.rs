//! Protocol state machine
//!
//! ```text
//! AwaitingName  --(name accepted)--> ChoosingLobby
//! ChoosingLobby --(create/join ok)--> InLobby
//! InLobby       --(exit lobby)-->    ChoosingLobby
//! InLobby       --(lobby starts)-->  InMatch
//! InMatch       --(exit match)-->    ChoosingLobby
//! ```
//!
//! [`route`] is the transition table: it maps a (state, kind) pair to the
//! handler that acts on it. Pairs with no entry are ignored, since client
//! and server states legitimately race during transitions.

use codex_core::MessageKind;
use std::fmt;

/// Connection lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    AwaitingName,
    ChoosingLobby,
    InLobby,
    InMatch,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handler selected for an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SetName,
    ListLobbies,
    CreateLobby,
    JoinLobby,
    ExitLobby,
    StartLobby,
    LobbyChat,
    ChooseSetup,
    PlaceCard,
    DrawCard,
    MatchChat,
    ExitMatch,
    Disconnect,
}

/// Look up the handler for `kind` in `state`
pub fn route(state: ProtocolState, kind: MessageKind) -> Option<Route> {
    use MessageKind as K;
    use ProtocolState as S;

    match (state, kind) {
        (_, K::Disconnect) => Some(Route::Disconnect),

        (S::AwaitingName, K::SetName) => Some(Route::SetName),

        (S::ChoosingLobby | S::InLobby, K::ListLobbies) => Some(Route::ListLobbies),
        (S::ChoosingLobby, K::CreateLobby) => Some(Route::CreateLobby),
        (S::ChoosingLobby, K::JoinLobby) => Some(Route::JoinLobby),

        // Still routed after a start so the late exit gets its refusal
        (S::InLobby | S::InMatch, K::ExitLobby) => Some(Route::ExitLobby),
        (S::InLobby, K::StartLobby) => Some(Route::StartLobby),
        (S::InLobby, K::Chat) => Some(Route::LobbyChat),

        (S::InMatch, K::ChooseSetup) => Some(Route::ChooseSetup),
        (S::InMatch, K::PlaceCard) => Some(Route::PlaceCard),
        (S::InMatch, K::DrawCard) => Some(Route::DrawCard),
        (S::InMatch, K::Chat) => Some(Route::MatchChat),
        (S::InMatch, K::ExitMatch) => Some(Route::ExitMatch),

        _ => None,
    }
}
