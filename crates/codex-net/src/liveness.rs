//! Liveness tracking
//!
//! Both transports keep a [`Liveness`] record touched on every inbound
//! signal. The byte-stream transport enforces it with a read timeout; the
//! remote-object transport relies on a shared [`LivenessChecker`] that
//! periodically closes peers whose last-seen time is older than the sense
//! interval.

use crate::transport::Transport;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Last-seen timestamp of a peer
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
    sense_interval: Duration,
}

impl Liveness {
    pub fn new(sense_interval: Duration) -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
            sense_interval,
        }
    }

    /// Record a sign of life
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last sign of life
    pub fn silence(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.silence() > self.sense_interval
    }

    pub fn sense_interval(&self) -> Duration {
        self.sense_interval
    }
}

/// Shared periodic checker for pull-style liveness
pub struct LivenessChecker {
    watched: Arc<Mutex<Vec<Weak<dyn Transport>>>>,
    task: JoinHandle<()>,
}

impl LivenessChecker {
    /// Start the checker on the current runtime
    pub fn spawn(period: Duration) -> Arc<Self> {
        let watched: Arc<Mutex<Vec<Weak<dyn Transport>>>> = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(check_loop(watched.clone(), period));
        Arc::new(Self { watched, task })
    }

    /// Start checking a transport. Dropped transports are forgotten.
    pub fn watch(&self, transport: Weak<dyn Transport>) {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
    }

    /// Number of transports still being checked
    pub fn watched(&self) -> usize {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for LivenessChecker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn check_loop(watched: Arc<Mutex<Vec<Weak<dyn Transport>>>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;

        let expired: Vec<Arc<dyn Transport>> = {
            let mut list = watched.lock().unwrap_or_else(PoisonError::into_inner);
            let mut expired = Vec::new();
            list.retain(|weak| match weak.upgrade() {
                Some(transport) if transport.is_closed() => false,
                Some(transport) if transport.liveness().is_expired() => {
                    expired.push(transport);
                    false
                }
                Some(_) => true,
                None => false,
            });
            expired
        };

        for transport in expired {
            info!(
                "No sign of life from {} for {:?}, closing",
                transport.peer(),
                transport.liveness().silence()
            );
            transport.close().await;
        }
        debug!("Liveness check done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codex_core::{CodexError, Frame, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Silent {
        liveness: Liveness,
        closed: AtomicBool,
        closes: AtomicUsize,
    }

    impl Silent {
        fn new(sense: Duration) -> Arc<Self> {
            Arc::new(Self {
                liveness: Liveness::new(sense),
                closed: AtomicBool::new(false),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Silent {
        async fn send(&self, _frame: Frame) -> Result<()> {
            Err(CodexError::ConnectionLost)
        }
        async fn receive(&self) -> Result<Frame> {
            Err(CodexError::ConnectionLost)
        }
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        fn liveness(&self) -> &Liveness {
            &self.liveness
        }
        fn peer(&self) -> String {
            "silent".into()
        }
    }

    #[test]
    fn test_touch_resets_silence() {
        let liveness = Liveness::new(Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(40));
        assert!(liveness.is_expired());
        liveness.touch();
        assert!(!liveness.is_expired());
    }

    #[tokio::test]
    async fn test_checker_closes_silent_peer_once() {
        let checker = LivenessChecker::spawn(Duration::from_millis(10));
        let silent = Silent::new(Duration::from_millis(50));
        let as_dyn: Arc<dyn Transport> = silent.clone();
        checker.watch(Arc::downgrade(&as_dyn));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(silent.is_closed());
        assert_eq!(silent.closes.load(Ordering::SeqCst), 1);
        assert_eq!(checker.watched(), 0);
    }

    #[tokio::test]
    async fn test_checker_keeps_chatty_peer() {
        let checker = LivenessChecker::spawn(Duration::from_millis(10));
        let chatty = Silent::new(Duration::from_millis(60));
        let as_dyn: Arc<dyn Transport> = chatty.clone();
        checker.watch(Arc::downgrade(&as_dyn));

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            chatty.liveness().touch();
        }
        assert!(!chatty.is_closed());
        assert_eq!(checker.watched(), 1);
    }

    #[tokio::test]
    async fn test_checker_forgets_dropped_transport() {
        let checker = LivenessChecker::spawn(Duration::from_millis(10));
        {
            let gone: Arc<dyn Transport> = Silent::new(Duration::from_secs(10));
            checker.watch(Arc::downgrade(&gone));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(checker.watched(), 0);
    }
}
