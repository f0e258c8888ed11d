//! Remote-object transport
//!
//! Each peer exposes two remote methods over newline-delimited JSON-RPC 2.0:
//! `push` delivers one message and `heartbeat` proves the caller is alive.
//! The caller of a remote method is blocked until the callee acknowledges,
//! so the callee hands pushed messages to an inbox and acks immediately.
//!
//! Liveness is pull-style: the heartbeat handler touches the last-seen
//! timestamp, and a shared [`LivenessChecker`] closes silent peers.

use crate::liveness::{Liveness, LivenessChecker};
use crate::transport::{Transport, closed_signal};
use async_trait::async_trait;
use codex_core::{CodexError, Frame, Message, NetConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Remote method delivering one message
pub const METHOD_PUSH: &str = "push";
/// Remote method proving liveness
pub const METHOD_HEARTBEAT: &str = "heartbeat";

/// JSON-RPC method not found
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC invalid params
pub const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl Response {
    pub fn success(id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::Value::Null),
            error: None,
        }
    }

    pub fn error(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Any inbound line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(Request),
    Response(Response),
}

type PendingCalls = StdMutex<HashMap<u64, oneshot::Sender<Response>>>;

pub struct RemoteTransport {
    config: NetConfig,
    checker: Arc<LivenessChecker>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox: Mutex<mpsc::UnboundedReceiver<Message>>,
    pending: PendingCalls,
    next_id: AtomicU64,
    reserved: AtomicBool,
    closed: watch::Sender<bool>,
    liveness: Liveness,
    peer: StdMutex<String>,
}

impl RemoteTransport {
    /// An unconnected transport checked by `checker` once connected
    pub fn new(config: NetConfig, checker: Arc<LivenessChecker>) -> Arc<Self> {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            config,
            checker,
            writer: Mutex::new(None),
            inbox_tx,
            inbox: Mutex::new(inbox),
            pending: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reserved: AtomicBool::new(false),
            closed,
            liveness: Liveness::new(config.sense_interval),
            peer: StdMutex::new("unconnected".to_string()),
        })
    }

    /// Wrap a stream accepted by a listening socket
    pub async fn accept(
        stream: TcpStream,
        config: NetConfig,
        checker: Arc<LivenessChecker>,
    ) -> Arc<Self> {
        let transport = Self::new(config, checker);
        transport.reserved.store(true, Ordering::SeqCst);
        transport.attach(stream).await;
        transport
    }

    /// Connect to a remote endpoint. Fails with `AlreadyReserved` on reuse.
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
        *self.writer.lock().await = Some(write_half);
        self.liveness.touch();

        let as_dyn: Arc<dyn Transport> = self.clone();
        self.checker.watch(Arc::downgrade(&as_dyn));

        tokio::spawn(dispatch_loop(
            Arc::downgrade(self),
            read_half,
            self.closed.subscribe(),
        ));
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(self),
            self.closed.subscribe(),
            self.config,
        ));
    }

    async fn write_line<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(CodexError::ConnectionLost);
        };
        let write = async {
            writer.write_all(&line).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.config.sense_interval, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!("Remote write to {} failed: {}", self.peer(), e);
                Err(CodexError::ConnectionLost)
            }
            Err(_) => Err(CodexError::ConnectionLost),
        }
    }

    /// Invoke a remote method and wait for its acknowledgement
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, ack_tx);

        let request = Request::new(id, method, params);
        if let Err(e) = self.write_line(&request).await {
            self.forget(id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.sense_interval, ack_rx).await {
            Ok(Ok(response)) => match response.error {
                None => Ok(()),
                Some(err) => Err(CodexError::RemoteError(format!(
                    "{} ({})",
                    err.message, err.code
                ))),
            },
            Ok(Err(_)) => Err(CodexError::ConnectionLost),
            Err(_) => {
                self.forget(id);
                debug!("Remote call {} to {} timed out", method, self.peer());
                Err(CodexError::ConnectionLost)
            }
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Serve one inbound request. Never blocks on application work.
    async fn serve(&self, request: Request) {
        self.liveness.touch();
        let response = match request.method.as_str() {
            METHOD_HEARTBEAT => Response::success(request.id),
            METHOD_PUSH => match serde_json::from_value::<Message>(request.params) {
                Ok(msg) => {
                    // Receiver gone means we are closing; ack anyway
                    let _ = self.inbox_tx.send(msg);
                    Response::success(request.id)
                }
                Err(e) => Response::error(request.id, INVALID_PARAMS, e.to_string()),
            },
            other => {
                warn!("Unknown remote method from {}: {}", self.peer(), other);
                Response::error(request.id, METHOD_NOT_FOUND, format!("no method {}", other))
            }
        };
        if let Err(e) = self.write_line(&response).await {
            debug!("Failed to acknowledge call from {}: {}", self.peer(), e);
            self.close().await;
        }
    }

    fn complete(&self, response: Response) {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&response.id);
        match waiter {
            Some(ack_tx) => {
                let _ = ack_tx.send(response);
            }
            None => debug!("Late acknowledgement {} from {}", response.id, self.peer()),
        }
    }
}

/// Read inbound lines until the stream ends or the transport closes
async fn dispatch_loop(
    transport: Weak<RemoteTransport>,
    read_half: OwnedReadHalf,
    closed: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    let stop = closed_signal(closed);
    tokio::pin!(stop);
    loop {
        let line = tokio::select! {
            _ = &mut stop => break,
            line = lines.next_line() => line,
        };
        let Some(transport) = transport.upgrade() else { break };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(Envelope::Request(request)) => transport.serve(request).await,
                    Ok(Envelope::Response(response)) => transport.complete(response),
                    Err(e) => {
                        debug!("Undecodable line from {}: {}", transport.peer(), e);
                        transport.close().await;
                        break;
                    }
                }
            }
            Ok(None) => {
                debug!("Remote peer {} closed the stream", transport.peer());
                transport.close().await;
                break;
            }
            Err(e) => {
                debug!("Remote read from {} failed: {}", transport.peer(), e);
                transport.close().await;
                break;
            }
        }
    }
    debug!("Remote dispatch task exiting");
}

/// Call `heartbeat` on the peer every `heartbeat_interval`
async fn heartbeat_loop(
    transport: Weak<RemoteTransport>,
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
                // Calls block until acked, so heartbeats run off the ticker task
                tokio::spawn(async move {
                    let _ = transport.send(Frame::Heartbeat).await;
                });
            }
        }
    }
    debug!("Remote heartbeat task exiting");
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(CodexError::ConnectionLost);
        }
        let outcome = match frame {
            Frame::Heartbeat => self.call(METHOD_HEARTBEAT, serde_json::Value::Null).await,
            Frame::Message(msg) => {
                let params = serde_json::to_value(&msg)?;
                self.call(METHOD_PUSH, params).await
            }
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(CodexError::RemoteError(detail)) => {
                warn!("Remote call to {} refused: {}", self.peer(), detail);
                Err(CodexError::RemoteError(detail))
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
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            _ = &mut stop => Err(CodexError::ConnectionLost),
            msg = inbox.recv() => match msg {
                Some(msg) => Ok(Frame::Message(msg)),
                None => Err(CodexError::ConnectionLost),
            },
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!("Closing remote transport to {}", self.peer());
        // Dropping the senders wakes every outstanding call
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Remote shutdown failed: {}", e);
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use codex_core::MessageKind;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn pair(
        config: NetConfig,
        checker: &Arc<LivenessChecker>,
    ) -> (Arc<RemoteTransport>, Arc<RemoteTransport>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = RemoteTransport::new(config, checker.clone());
        let (accepted, connected) =
            tokio::join!(listener.accept(), client.connect("127.0.0.1", port));
        connected.unwrap();
        let (stream, _) = accepted.unwrap();
        let server = RemoteTransport::accept(stream, config, checker.clone()).await;
        (client, server)
    }

    #[test]
    fn test_envelope_classification() {
        let req = r#"{"jsonrpc":"2.0","id":7,"method":"heartbeat"}"#;
        assert!(matches!(
            serde_json::from_str::<Envelope>(req).unwrap(),
            Envelope::Request(Request { id: 7, .. })
        ));
        let resp = r#"{"jsonrpc":"2.0","id":7,"result":null}"#;
        assert!(matches!(
            serde_json::from_str::<Envelope>(resp).unwrap(),
            Envelope::Response(Response { id: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_push_is_delivered_and_acked() {
        let config = NetConfig::with_millis(20, 500, 20);
        let checker = LivenessChecker::spawn(config.liveness_check_interval);
        let (client, server) = pair(config, &checker).await;

        client
            .send(Message::unary(MessageKind::Chat, "over rpc").into())
            .await
            .unwrap();
        match server.receive().await.unwrap() {
            Frame::Message(msg) => assert_eq!(msg.text(0).unwrap(), "over rpc"),
            Frame::Heartbeat => panic!("heartbeats are not surfaced"),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_calls_keep_peer_alive() {
        let config = NetConfig::with_millis(20, 100, 10);
        let checker = LivenessChecker::spawn(config.liveness_check_interval);
        let (client, server) = pair(config, &checker).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!client.is_closed());
        assert!(!server.is_closed());
        assert!(server.liveness().silence() < config.sense_interval);
    }

    #[tokio::test]
    async fn test_close_wakes_receive_and_fails_send() {
        let config = NetConfig::with_millis(20, 500, 20);
        let checker = LivenessChecker::spawn(config.liveness_check_interval);
        let (client, server) = pair(config, &checker).await;

        let reader = server.clone();
        let blocked = tokio::spawn(async move { reader.receive().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close().await;
        server.close().await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(CodexError::ConnectionLost)));
        assert!(matches!(
            server.send(Frame::Heartbeat).await,
            Err(CodexError::ConnectionLost)
        ));

        // The peer notices the stream end
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_connect_twice_is_already_reserved() {
        let config = NetConfig::with_millis(20, 500, 20);
        let checker = LivenessChecker::spawn(config.liveness_check_interval);
        let (client, _server) = pair(config, &checker).await;
        assert!(matches!(
            client.connect("127.0.0.1", 1).await,
            Err(CodexError::AlreadyReserved)
        ));
    }
}
