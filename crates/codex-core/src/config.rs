//! Network timing and transport selection

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default TCP port for the server
pub const DEFAULT_PORT: u16 = 40000;

/// Which transport a server or client uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// Length-prefixed frames over a byte stream
    #[default]
    Stream,
    /// Remote method calls (`--rmi`)
    Remote,
}

/// Liveness timing shared by both transports.
///
/// `sense_interval` is the single timeout primitive: it bounds the stream
/// read timeout, the remote liveness window and every remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    /// Period between outgoing heartbeats
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is considered gone
    pub sense_interval: Duration,
    /// Period of the shared remote liveness checker
    pub liveness_check_interval: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            sense_interval: Duration::from_secs(5),
            liveness_check_interval: Duration::from_secs(1),
        }
    }
}

impl NetConfig {
    /// Defaults overridden by `CODEX_HEARTBEAT_MS`, `CODEX_SENSE_MS` and
    /// `CODEX_LIVENESS_CHECK_MS` when set to a positive integer
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            heartbeat_interval: millis_from_env("CODEX_HEARTBEAT_MS", defaults.heartbeat_interval),
            sense_interval: millis_from_env("CODEX_SENSE_MS", defaults.sense_interval),
            liveness_check_interval: millis_from_env(
                "CODEX_LIVENESS_CHECK_MS",
                defaults.liveness_check_interval,
            ),
        }
    }

    /// Short intervals for tests and local tooling
    pub fn with_millis(heartbeat: u64, sense: u64, liveness_check: u64) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(heartbeat),
            sense_interval: Duration::from_millis(sense),
            liveness_check_interval: Duration::from_millis(liveness_check),
        }
    }
}

fn millis_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse_millis(&raw))
        .unwrap_or(default)
}

fn parse_millis(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}
