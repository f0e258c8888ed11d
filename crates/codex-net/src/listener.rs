//! Per-connection listener loop
//!
//! One task per connection blocks on `receive`, offers each message to the
//! correlator and passes the rest to a [`Reactor`] in receipt order. Any
//! transport failure ends the loop, closes the link and reports the
//! disconnection exactly once.

use crate::link::Link;
use async_trait::async_trait;
use codex_core::{Frame, Message, MessageKind, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Application side of a connection
#[async_trait]
pub trait Reactor: Send + Sync + 'static {
    /// React to one inbound message that no waiter claimed
    async fn react(&self, msg: Message) -> Result<()>;

    /// The connection is gone. Called once, after the link is closed.
    async fn disconnected(&self);
}

/// Run the listener loop until the connection dies
pub async fn listen(link: Arc<Link>, reactor: Arc<dyn Reactor>) {
    loop {
        let frame = match link.transport().receive().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Listener for {} stopping: {}", link.peer(), e);
                break;
            }
        };

        let msg = match frame {
            Frame::Heartbeat => {
                link.transport().liveness().touch();
                continue;
            }
            Frame::Message(msg) => msg,
        };

        let Some(msg) = link.correlator().offer(msg) else {
            continue;
        };

        let kind = msg.kind;
        // Run the reaction on its own task so a panic is contained, but
        // await it to keep messages in receipt order
        let reaction = {
            let reactor = reactor.clone();
            tokio::spawn(async move { reactor.react(msg).await })
        };
        let fault = match reaction.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(join_error) => Some(format!("handler panicked: {}", join_error)),
        };
        if let Some(detail) = fault {
            error!("Reaction to {} from {} failed: {}", kind, link.peer(), detail);
            let reply = Message::unary(MessageKind::UnknownError, detail);
            if link.send(reply).await.is_err() {
                break;
            }
        }
    }

    link.close().await;
    reactor.disconnected().await;
}

/// Spawn [`listen`] as the connection's listener task
pub fn spawn_listener(link: Arc<Link>, reactor: Arc<dyn Reactor>) -> JoinHandle<()> {
    tokio::spawn(listen(link, reactor))
}
