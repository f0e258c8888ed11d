//! Network substrate for Codex Online
//!
//! This crate provides:
//! - Frame encoding and length-prefixed framing
//! - The [`Transport`] abstraction with byte-stream and remote-object variants
//! - Liveness tracking and the shared liveness checker
//! - Request/response correlation over an asynchronous channel
//! - The per-connection listener loop

pub mod correlator;
pub mod link;
pub mod listener;
pub mod liveness;
pub mod protocol;
pub mod rpc;
pub mod stream;
pub mod tcp;
pub mod transport;

pub use correlator::Correlator;
pub use link::Link;
pub use listener::{Reactor, listen, spawn_listener};
pub use liveness::{Liveness, LivenessChecker};
pub use rpc::RemoteTransport;
pub use stream::StreamTransport;
pub use transport::Transport;

use codex_core::{NetConfig, Result, TransportKind};
use std::sync::Arc;

/// Open a client connection over the chosen transport
pub async fn connect(
    host: &str,
    port: u16,
    kind: TransportKind,
    config: NetConfig,
) -> Result<Arc<dyn Transport>> {
    match kind {
        TransportKind::Stream => {
            let transport = StreamTransport::new(config);
            transport.connect(host, port).await?;
            Ok(transport)
        }
        TransportKind::Remote => {
            let checker = LivenessChecker::spawn(config.liveness_check_interval);
            let transport = RemoteTransport::new(config, checker);
            transport.connect(host, port).await?;
            Ok(transport)
        }
    }
}
