//! Request/response correlation
//!
//! Lets a caller send a request and wait for the matching reply, which
//! arrives on the connection's listener task. Only one wait is outstanding
//! per connection; further callers queue behind it. The listener offers
//! every inbound message to the correlator first, and whatever is not
//! claimed by the waiter goes down the push-event path.

use crate::transport::Transport;
use codex_core::{CodexError, Message, MessageKind, Result};
use std::collections::HashSet;
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

struct Waiter {
    accepted: HashSet<MessageKind>,
    reply_tx: oneshot::Sender<Message>,
}

#[derive(Default)]
struct Slot {
    waiter: Option<Waiter>,
    failed: bool,
}

#[derive(Default)]
pub struct Correlator {
    turn: Mutex<()>,
    slot: StdMutex<Slot>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `request` and wait for a reply whose kind is in `accepted`.
    ///
    /// `UnknownError` is always accepted so a failing handler on the other
    /// side still releases the caller. Connection loss wakes the caller with
    /// `ConnectionLost`.
    pub async fn send_and_wait(
        &self,
        transport: &dyn Transport,
        request: Message,
        accepted: &[MessageKind],
    ) -> Result<Message> {
        let _turn = self.turn.lock().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut slot = self.slot();
            if slot.failed {
                return Err(CodexError::ConnectionLost);
            }
            let mut accepted: HashSet<MessageKind> = accepted.iter().copied().collect();
            accepted.insert(MessageKind::UnknownError);
            slot.waiter = Some(Waiter { accepted, reply_tx });
        }

        let kind = request.kind;
        if let Err(e) = transport.send(request.into()).await {
            self.slot().waiter = None;
            return Err(e);
        }

        match reply_rx.await {
            Ok(reply) => {
                debug!("{} answered with {}", kind, reply.kind);
                Ok(reply)
            }
            Err(_) => Err(CodexError::ConnectionLost),
        }
    }

    /// Hand `msg` to the waiter if it is waiting for this kind.
    ///
    /// Returns the message back when nobody claims it.
    pub fn offer(&self, msg: Message) -> Option<Message> {
        let mut slot = self.slot();
        let wanted = slot
            .waiter
            .as_ref()
            .is_some_and(|waiter| waiter.accepted.contains(&msg.kind));
        if !wanted {
            return Some(msg);
        }
        match slot.waiter.take() {
            Some(waiter) => waiter.reply_tx.send(msg).err(),
            None => Some(msg),
        }
    }

    /// Wake the waiter with `ConnectionLost` and refuse future waits
    pub fn fail(&self) {
        let mut slot = self.slot();
        slot.failed = true;
        slot.waiter = None;
    }

    pub fn is_waiting(&self) -> bool {
        self.slot().waiter.is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
