//! Byte-stream transport
//!
//! Frames travel length-prefixed over a TCP stream. Reads and writes are
//! guarded by independent locks so a blocked receive never holds up a
//! send. A background task emits a heartbeat every `heartbeat_interval`,
//! and every read is bounded by `sense_interval`.

use crate::liveness::Liveness;
use crate::tcp::{FrameReader, FrameWriter};
use crate::transport::{Transport, closed_signal};
use async_trait::async_trait;
use codex_core::{CodexError, Frame, NetConfig, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

pub struct StreamTransport {
    config: NetConfig,
    reader: Mutex<Option<FrameReader<OwnedReadHalf>>>,
    writer: Mutex<Option<FrameWriter<OwnedWriteHalf>>>,
    reserved: AtomicBool,
    closed: watch::Sender<bool>,
    liveness: Liveness,
    peer: StdMutex<String>,
}

impl StreamTransport {
    /// An unconnected transport; call [`StreamTransport::connect`] next
    pub fn new(config: NetConfig) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            config,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            reserved: AtomicBool::new(false),
            closed,
            liveness: Liveness::new(config.sense_interval),
            peer: StdMutex::new("unconnected".to_string()),
        })
    }

    /// Wrap a stream accepted by a listening socket
    pub async fn accept(stream: TcpStream, config: NetConfig) -> Arc<Self> {
        let transport = Self::new(config);
        transport.reserved.store(true, Ordering::SeqCst);
        transport.attach(stream).await;
        transport
    }

    /// Connect to a remote endpoint.
    ///
    /// Fails with `AlreadyReserved` if this transport already owns (or
    /// owned) a connection.
    pub async fn connect(self: &Arc<Self>, host: &str, port: u16) -> Result<()> {
        if self.reserved.swap(true, Ordering::SeqCst) {
            return Err(CodexError::AlreadyReserved);
        }
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                self.attach(stream).await;
                Ok(())
            }
            Err(e) => {
                self.reserved.store(false, Ordering::SeqCst);
                Err(CodexError::ConnectFailed(format!("{}:{}: {}", host, port, e)))
            }
        }
    }

    async fn attach(self: &Arc<Self>, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = peer;

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(FrameReader::new(read_half));
        *self.writer.lock().await = Some(FrameWriter::new(write_half));
        self.liveness.touch();

        tokio::spawn(heartbeat_loop(
            Arc::downgrade(self),
            self.closed.subscribe(),
            self.config,
        ));
    }
}

/// Emit heartbeats until the transport closes or is dropped
async fn heartbeat_loop(
    transport: Weak<StreamTransport>,
    closed: watch::Receiver<bool>,
    config: NetConfig,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    let stop = closed_signal(closed);
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let Some(transport) = transport.upgrade() else { break };
                if transport.send(Frame::Heartbeat).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Heartbeat task exiting");
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(CodexError::ConnectionLost);
        }
        let outcome = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => {
                    match tokio::time::timeout(
                        self.config.sense_interval,
                        writer.write_frame(&frame),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(CodexError::ConnectionLost),
                    }
                }
                None => Err(CodexError::ConnectionLost),
            }
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(CodexError::ProtocolError(detail)) => {
                // Unsendable frame; the stream itself is still intact
                debug!("Dropping unsendable frame to {}: {}", self.peer(), detail);
                Err(CodexError::ProtocolError(detail))
            }
            Err(_) => {
                self.close().await;
                Err(CodexError::ConnectionLost)
            }
        }
    }

    async fn receive(&self) -> Result<Frame> {
        let stop = closed_signal(self.closed.subscribe());
        tokio::pin!(stop);
        if self.is_closed() {
            return Err(CodexError::ConnectionLost);
        }

        let outcome = {
            let mut guard = self.reader.lock().await;
            let Some(reader) = guard.as_mut() else {
                return Err(CodexError::ConnectionLost);
            };
            tokio::select! {
                _ = &mut stop => Err(CodexError::ConnectionLost),
                read = tokio::time::timeout(self.config.sense_interval, reader.read_frame()) => {
                    match read {
                        Ok(result) => result,
                        Err(_) => {
                            info!(
                                "No frame from {} within {:?}",
                                self.peer(),
                                self.config.sense_interval
                            );
                            Err(CodexError::ConnectionLost)
                        }
                    }
                }
            }
        };

        match outcome {
            Ok(frame) => {
                self.liveness.touch();
                Ok(frame)
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!("Closing stream transport to {}", self.peer());
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await;
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    fn peer(&self) -> String {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
