//! Message handlers
//!
//! [`dispatch`] consults the transition table and runs the selected
//! handler. Handlers re-check the session state under its lock before
//! acting, because another session (a lobby start, a prune) may have moved
//! it since the route was chosen. A handler returns `Err` only for a
//! malformed payload; refusals are replies.

use crate::context::ServerContext;
use crate::flow::{FlowEvent, FlowResult};
use crate::lobby::Match;
use crate::protocol::{ProtocolState, Route, route};
use crate::session::Session;
use codex_core::validation::is_valid_chat;
use codex_core::{Field, LobbyId, Message, MessageKind, Refusal, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Route one inbound message for `session`
pub async fn dispatch(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: Message) -> Result<()> {
    let state = session.protocol().await;
    let Some(route) = route(state, msg.kind) else {
        debug!("Ignoring {} from {} in {}", msg.kind, session.label(), state);
        return Ok(());
    };

    match route {
        Route::SetName => set_name(ctx, session, &msg).await,
        Route::ListLobbies => list_lobbies(ctx, session, &msg).await,
        Route::CreateLobby => create_lobby(ctx, session, &msg).await,
        Route::JoinLobby => join_lobby(ctx, session, &msg).await,
        Route::ExitLobby => exit_lobby(ctx, session).await,
        Route::StartLobby => start_lobby(ctx, session).await,
        Route::LobbyChat => lobby_chat(ctx, session, &msg).await,
        Route::ChooseSetup => choose_setup(ctx, session, &msg).await,
        Route::PlaceCard => place_card(ctx, session, &msg).await,
        Route::DrawCard => draw_card(ctx, session, &msg).await,
        Route::MatchChat => match_chat(ctx, session, &msg).await,
        Route::ExitMatch => exit_match(ctx, session).await,
        Route::Disconnect => {
            info!("{} asked to disconnect", session.label());
            ctx.prune(session.id()).await;
            Ok(())
        }
    }
}

fn stale(session: &Session, expected: ProtocolState, actual: ProtocolState) -> Result<()> {
    debug!(
        "{} left {} before its message was handled (now {})",
        session.label(),
        expected,
        actual
    );
    Ok(())
}

fn player_name(session: &Session) -> &str {
    session.name().unwrap_or_default()
}

async fn set_name(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let name = msg.text(0)?;
    let mut state = session.state().lock().await;
    if state.protocol != ProtocolState::AwaitingName {
        return stale(session, ProtocolState::AwaitingName, state.protocol);
    }

    if let Err(refusal) = ctx.sessions.set_name(session.id(), name).await {
        drop(state);
        debug!("{} rejected name {:?}: {}", session.label(), name, refusal);
        ctx.send_to(session, Message::unary(MessageKind::NameRejected, refusal)).await;
        return Ok(());
    }

    // A disconnected match player coming back under the same name
    if let Some(game) = ctx.lobbies.find_reconnectable(name).await {
        let resumed = {
            let mut flow = game.flow().lock().await;
            flow.reconnect_player(name).map(|events| {
                let order = flow.players();
                let status = flow.status();
                let others: Vec<String> = flow
                    .connected_players()
                    .into_iter()
                    .filter(|player| player != name)
                    .collect();
                (events, order, status, others)
            })
        };
        if let Ok((events, order, status, others)) = resumed {
            state.enter_match(game.clone());
            drop(state);
            info!("{} rejoined {}", session.label(), game.id());

            ctx.send_to(session, Message::new(MessageKind::NameAccepted)).await;
            ctx.send_to(
                session,
                Message::binary(MessageKind::MatchResumed, Field::Names(order), status),
            )
            .await;
            let notice = Message::unary(MessageKind::PlayerReconnected, name);
            ctx.send_to_names(&others, &notice).await;
            ctx.publish_flow(&game, events).await;
            return Ok(());
        }
    }

    state.choose_lobby();
    drop(state);
    info!("{} is now known as {}", session.id(), name);
    ctx.send_to(session, Message::new(MessageKind::NameAccepted)).await;
    Ok(())
}

async fn list_lobbies(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let joinable_only = match msg.field(0) {
        Some(_) => msg.flag(0)?,
        None => true,
    };
    let lobbies = ctx.lobbies.list(joinable_only).await;
    ctx.send_to(session, Message::unary(MessageKind::LobbyList, Field::Lobbies(lobbies)))
        .await;
    Ok(())
}

async fn create_lobby(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let lobby_name = msg.text(0)?;
    let capacity = msg.int(1)?;
    let mut state = session.state().lock().await;
    if state.protocol != ProtocolState::ChoosingLobby {
        return stale(session, ProtocolState::ChoosingLobby, state.protocol);
    }

    let reply = match ctx
        .lobbies
        .create(lobby_name, capacity, player_name(session))
        .await
    {
        Ok(summary) => {
            state.enter_lobby(summary.id);
            Message::unary(MessageKind::LobbyJoined, summary)
        }
        Err(refusal) => Message::unary(MessageKind::LobbyRefused, refusal),
    };
    drop(state);
    ctx.send_to(session, reply).await;
    Ok(())
}

async fn join_lobby(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let raw_id = msg.int(0)?;
    let mut state = session.state().lock().await;
    if state.protocol != ProtocolState::ChoosingLobby {
        return stale(session, ProtocolState::ChoosingLobby, state.protocol);
    }

    let outcome = match u64::try_from(raw_id) {
        Ok(id) => ctx.lobbies.join(LobbyId(id), player_name(session)).await,
        Err(_) => Err(Refusal::LobbyNotFound),
    };
    match outcome {
        Ok(summary) => {
            state.enter_lobby(summary.id);
            drop(state);
            let others: Vec<String> = summary
                .members
                .iter()
                .filter(|member| member.as_str() != player_name(session))
                .cloned()
                .collect();
            ctx.send_to(session, Message::unary(MessageKind::LobbyJoined, summary.clone()))
                .await;
            ctx.send_to_names(&others, &Message::unary(MessageKind::LobbyUpdated, summary))
                .await;
        }
        Err(refusal) => {
            drop(state);
            ctx.send_to(session, Message::unary(MessageKind::LobbyRefused, refusal))
                .await;
        }
    }
    Ok(())
}

async fn exit_lobby(ctx: &Arc<ServerContext>, session: &Arc<Session>) -> Result<()> {
    let mut state = session.state().lock().await;
    let id = match (state.protocol, state.lobby) {
        (ProtocolState::InLobby, Some(id)) => id,
        // A start moved this session into the match before the exit was handled
        (ProtocolState::InMatch, _) => {
            drop(state);
            debug!("{} tried to leave a started lobby", session.label());
            ctx.send_to(session, Message::unary(MessageKind::LobbyRefused, Refusal::LobbyOngoing))
                .await;
            return Ok(());
        }
        (actual, _) => return stale(session, ProtocolState::InLobby, actual),
    };

    match ctx.lobbies.exit_lobby(id, player_name(session)).await {
        Ok(remaining) => {
            state.choose_lobby();
            drop(state);
            ctx.send_to(session, Message::new(MessageKind::LobbyExited)).await;
            if let Some(summary) = remaining {
                let members = summary.members.clone();
                ctx.send_to_names(&members, &Message::unary(MessageKind::LobbyUpdated, summary))
                    .await;
            }
        }
        // The lobby started first; the start moves this session into the match
        Err(refusal) => {
            drop(state);
            debug!("{} could not leave {}: {}", session.label(), id, refusal);
            ctx.send_to(session, Message::unary(MessageKind::LobbyRefused, refusal))
                .await;
        }
    }
    Ok(())
}

async fn start_lobby(ctx: &Arc<ServerContext>, session: &Arc<Session>) -> Result<()> {
    let mut state = session.state().lock().await;
    let (ProtocolState::InLobby, Some(id)) = (state.protocol, state.lobby) else {
        return stale(session, ProtocolState::InLobby, state.protocol);
    };

    let game = match ctx.lobbies.start(id, player_name(session)).await {
        Ok(game) => game,
        Err(refusal) => {
            drop(state);
            ctx.send_to(session, Message::unary(MessageKind::StartRefused, refusal))
                .await;
            return Ok(());
        }
    };
    state.enter_match(game.clone());
    drop(state);

    let players = game.flow().lock().await.players();
    for member in ctx.sessions.by_names(&players).await {
        if member.id() == session.id() {
            continue;
        }
        let mut member_state = member.state().lock().await;
        if member_state.protocol == ProtocolState::InLobby && member_state.lobby == Some(id) {
            member_state.enter_match(game.clone());
        }
    }

    let started = Message::unary(MessageKind::MatchStarted, Field::Names(players.clone()));
    ctx.send_to_names(&players, &started).await;
    Ok(())
}

async fn lobby_chat(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let text = msg.text(0)?;
    let lobby = {
        let state = session.state().lock().await;
        state.lobby
    };
    let Some(lobby) = lobby else {
        return Ok(());
    };
    if !is_valid_chat(text) {
        ctx.send_to(session, Message::unary(MessageKind::ActionRefused, Refusal::InvalidChat))
            .await;
        return Ok(());
    }
    ctx.send_to(session, Message::new(MessageKind::ActionAccepted)).await;
    if let Some(summary) = ctx.lobbies.summary(lobby).await {
        let chat = Message::binary(MessageKind::ChatMessage, player_name(session), text);
        ctx.send_to_names(&summary.members, &chat).await;
    }
    Ok(())
}

async fn current_match(session: &Session) -> Option<Arc<Match>> {
    session.state().lock().await.game.clone()
}

/// Reply to a flow operation and publish its events
async fn answer_action(
    ctx: &Arc<ServerContext>,
    session: &Arc<Session>,
    game: &Match,
    outcome: FlowResult<Vec<FlowEvent>>,
) {
    match outcome {
        Ok(events) => {
            ctx.send_to(session, Message::new(MessageKind::ActionAccepted)).await;
            ctx.publish_flow(game, events).await;
        }
        Err(refusal) => {
            debug!("{} refused for {}: {}", game.id(), session.label(), refusal);
            ctx.send_to(session, Message::unary(MessageKind::ActionRefused, refusal))
                .await;
        }
    }
}

async fn choose_setup(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let starter_face_up = msg.flag(0)?;
    let goal = msg.int(1)?;
    let Some(game) = current_match(session).await else {
        return Ok(());
    };
    let outcome = match usize::try_from(goal) {
        Ok(goal) => {
            game.flow()
                .lock()
                .await
                .choose_setup(player_name(session), starter_face_up, goal)
        }
        Err(_) => Err(Refusal::InvalidMove("no such goal".into())),
    };
    answer_action(ctx, session, &game, outcome).await;
    Ok(())
}

async fn place_card(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let slot = msg.int(0)?;
    let position = msg.position(1)?;
    let face_up = msg.flag(2)?;
    let Some(game) = current_match(session).await else {
        return Ok(());
    };
    let outcome = match usize::try_from(slot) {
        Ok(slot) => {
            game.flow()
                .lock()
                .await
                .place_card(player_name(session), slot, position, face_up)
        }
        Err(_) => Err(Refusal::InvalidMove("empty hand slot".into())),
    };
    answer_action(ctx, session, &game, outcome).await;
    Ok(())
}

async fn draw_card(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let source = msg.source(0)?;
    let Some(game) = current_match(session).await else {
        return Ok(());
    };
    let outcome = game
        .flow()
        .lock()
        .await
        .draw_card(player_name(session), source);
    answer_action(ctx, session, &game, outcome).await;
    Ok(())
}

async fn match_chat(ctx: &Arc<ServerContext>, session: &Arc<Session>, msg: &Message) -> Result<()> {
    let text = msg.text(0)?;
    let Some(game) = current_match(session).await else {
        return Ok(());
    };
    if !is_valid_chat(text) {
        ctx.send_to(session, Message::unary(MessageKind::ActionRefused, Refusal::InvalidChat))
            .await;
        return Ok(());
    }
    ctx.send_to(session, Message::new(MessageKind::ActionAccepted)).await;
    let players = game.flow().lock().await.connected_players();
    let chat = Message::binary(MessageKind::ChatMessage, player_name(session), text);
    ctx.send_to_names(&players, &chat).await;
    Ok(())
}

async fn exit_match(ctx: &Arc<ServerContext>, session: &Arc<Session>) -> Result<()> {
    let mut state = session.state().lock().await;
    let Some(game) = state.game.clone() else {
        return stale(session, ProtocolState::InMatch, state.protocol);
    };
    let name = player_name(session);
    let departure = ctx.lobbies.leave_match(&game, name, true).await;
    state.choose_lobby();
    drop(state);

    ctx.send_to(session, Message::new(MessageKind::MatchExited)).await;
    match departure {
        Ok(departure) => ctx.publish_departure(&game, name, departure).await,
        Err(refusal) => debug!("{} leaving {}: {}", session.label(), game.id(), refusal),
    }
    info!("{} left {}", session.label(), game.id());
    Ok(())
}
