//! A transport paired with its correlator

use crate::correlator::Correlator;
use crate::transport::Transport;
use codex_core::{Message, MessageKind, Result};
use std::sync::Arc;

/// One connection as seen by the session layer
pub struct Link {
    transport: Arc<dyn Transport>,
    correlator: Correlator,
}

impl Link {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            correlator: Correlator::new(),
        }
    }

    /// Fire-and-forget send
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.transport.send(msg.into()).await
    }

    pub async fn send_and_wait(&self, request: Message, accepted: &[MessageKind]) -> Result<Message> {
        self.correlator
            .send_and_wait(self.transport.as_ref(), request, accepted)
            .await
    }

    /// Close the transport and wake any blocked waiter
    pub async fn close(&self) {
        self.transport.close().await;
        self.correlator.fail();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn peer(&self) -> String {
        self.transport.peer()
    }
}
