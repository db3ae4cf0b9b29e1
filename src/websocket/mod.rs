use crate::app::config::App;
use crate::error::{Error, Result};
use crate::protocol::messages::PusherMessage;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Unique id of one live connection within a broker process, in the
/// Pusher `<int>.<int>` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketId(pub String);

impl SocketId {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        Self(format!(
            "{}.{}",
            rng.random_range(1..=1_000_000_000u64),
            rng.random_range(1..=1_000_000_000u64)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated identity attached to a connection, installed by a
/// successful sign-in or presence subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub info: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    /// Server-initiated ping outstanding since the given instant.
    PingSent(Instant),
}

#[derive(Debug, Default)]
pub struct ConnectionTimeouts {
    pub activity_handle: Option<JoinHandle<()>>,
}

impl ConnectionTimeouts {
    pub fn clear_activity_timeout(&mut self) {
        if let Some(handle) = self.activity_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ConnectionTimeouts {
    fn drop(&mut self) {
        self.clear_activity_timeout();
    }
}

/// Per-connection protocol state. Everything here is owned by the
/// connection and torn down on close.
#[derive(Debug)]
pub struct ConnectionState {
    pub app: Option<App>,
    pub remote_address: Option<String>,
    pub origin: Option<String>,
    pub subscribed_channels: HashSet<String>,
    pub principal: Option<Principal>,
    pub last_pong_at: Instant,
    pub status: ConnectionStatus,
    pub timeouts: ConnectionTimeouts,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            app: None,
            remote_address: None,
            origin: None,
            subscribed_channels: HashSet::new(),
            principal: None,
            last_pong_at: Instant::now(),
            status: ConnectionStatus::Active,
            timeouts: ConnectionTimeouts::default(),
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscribed_channels.contains(channel)
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    pub fn time_since_last_pong(&self) -> Duration {
        self.last_pong_at.elapsed()
    }

    pub fn get_app_id(&self) -> String {
        self.app.as_ref().map(|a| a.id.clone()).unwrap_or_default()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection. Outbound frames go through an unbounded queue
/// consumed by a single writer task, which gives the per-connection FIFO
/// guarantee without blocking senders; sends after close are dropped.
#[derive(Debug)]
pub struct WebSocket {
    pub socket_id: SocketId,
    pub state: ConnectionState,
    outbound: mpsc::UnboundedSender<Message>,
    closed: bool,
}

impl WebSocket {
    pub fn new(socket_id: SocketId, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            socket_id,
            state: ConnectionState::new(),
            outbound,
            closed: false,
        }
    }

    pub fn send_message(&self, message: &PusherMessage) -> Result<()> {
        let serialized = serde_json::to_string(message)
            .map_err(|e| Error::InvalidMessageFormat(format!("Serialization failed: {e}")))?;
        self.send_text(Utf8Bytes::from(serialized))
    }

    pub fn send_text(&self, frame: Utf8Bytes) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed(self.socket_id.to_string()));
        }
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| Error::ConnectionClosed(self.socket_id.to_string()))
    }

    /// Enqueues a close frame; the writer task stops after flushing it.
    /// Idempotent.
    pub fn close(&mut self, code: u16, reason: String) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.outbound.send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from(reason),
        })));
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn update_activity(&mut self) {
        self.state.last_pong_at = Instant::now();
        self.state.status = ConnectionStatus::Active;
    }
}

/// Cheap shared handle to a connection. The outbound sender is carried
/// alongside the locked state so broadcasts can enqueue frames without
/// taking the state mutex.
#[derive(Debug, Clone)]
pub struct WebSocketRef {
    pub socket_id: SocketId,
    pub inner: Arc<Mutex<WebSocket>>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl WebSocketRef {
    pub fn new(socket_id: SocketId, outbound: mpsc::UnboundedSender<Message>) -> Self {
        let ws = WebSocket::new(socket_id.clone(), outbound.clone());
        Self {
            socket_id,
            inner: Arc::new(Mutex::new(ws)),
            outbound,
        }
    }

    pub async fn send_message(&self, message: &PusherMessage) -> Result<()> {
        self.inner.lock().await.send_message(message)
    }

    /// Lock-free send of a pre-serialised frame, used on broadcast paths
    /// where one serialisation is shared across many sockets.
    pub fn send_broadcast(&self, frame: Utf8Bytes) -> Result<()> {
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| Error::ConnectionClosed(self.socket_id.to_string()))
    }

    pub async fn close(&self, code: u16, reason: String) {
        self.inner.lock().await.close(code, reason);
    }
}

impl PartialEq for WebSocketRef {
    fn eq(&self, other: &Self) -> bool {
        self.socket_id == other.socket_id
    }
}

impl Eq for WebSocketRef {}

impl std::hash::Hash for WebSocketRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.socket_id.hash(state);
    }
}
