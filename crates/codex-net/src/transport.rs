//! Transport abstraction shared by the byte-stream and remote-object variants
//!
//! Upper layers only ever see [`Transport`]: one frame in, one frame out,
//! and a single "connection lost" outcome for every failure.

use crate::liveness::Liveness;
use async_trait::async_trait;
use codex_core::{Frame, Result};
use tokio::sync::watch;

/// A connection to one peer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame.
    ///
    /// On failure the transport closes itself and returns `ConnectionLost`.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Wait for the next inbound frame.
    ///
    /// Returns `ConnectionLost` once the transport is closed, times out or
    /// fails. Only one task reads at a time.
    async fn receive(&self) -> Result<Frame>;

    /// Dispose of the connection. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    /// Last-seen tracking for this peer
    fn liveness(&self) -> &Liveness;

    /// Peer address for logging
    fn peer(&self) -> String;
}

/// Resolves once `closed` flips to true or its sender is gone
pub(crate) async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
