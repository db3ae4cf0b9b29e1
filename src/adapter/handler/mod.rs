pub mod authentication;
pub mod client_event;
pub mod subscription;
pub mod timeout_management;
pub mod types;

use crate::adapter::ConnectionManager;
use crate::app::config::App;
use crate::app::manager::AppManager;
use crate::channel::ChannelManager;
use crate::dispatch::{DispatchEngine, DispatchOrigin};
use crate::error::{Error, Result};
use crate::options::ServerOptions;
use crate::protocol::constants::{
    ADMISSION_BACKEND_TIMEOUT, PRE_SERIALIZED_PONG, is_client_event, protocol_event_name,
};
use crate::protocol::messages::PusherMessage;
use crate::statistics::StatisticsCollector;
use crate::websocket::{SocketId, WebSocketRef};
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use dashmap::DashSet;
use futures_util::{SinkExt, StreamExt};
use http::HeaderMap;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

/// Owns one side of the protocol: admission, the per-connection read loop,
/// message routing and teardown. Shared by every connection.
pub struct ConnectionHandler {
    pub app_manager: Arc<dyn AppManager + Send + Sync>,
    pub channel_manager: Arc<RwLock<ChannelManager>>,
    pub connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
    pub dispatch_engine: Arc<DispatchEngine>,
    pub statistics: Option<Arc<dyn StatisticsCollector>>,
    pub server_options: Arc<ServerOptions>,
    accepts_new_connections: AtomicBool,
    /// Process-wide socket id set; ids must be unique across apps.
    live_socket_ids: DashSet<SocketId, ahash::RandomState>,
}

impl ConnectionHandler {
    pub fn new(
        app_manager: Arc<dyn AppManager + Send + Sync>,
        channel_manager: Arc<RwLock<ChannelManager>>,
        connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
        dispatch_engine: Arc<DispatchEngine>,
        statistics: Option<Arc<dyn StatisticsCollector>>,
        server_options: Arc<ServerOptions>,
    ) -> Self {
        Self {
            app_manager,
            channel_manager,
            connection_manager,
            dispatch_engine,
            statistics,
            server_options,
            accepts_new_connections: AtomicBool::new(true),
            live_socket_ids: DashSet::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn accepts_new_connections(&self) -> bool {
        self.accepts_new_connections.load(Ordering::SeqCst)
    }

    /// Flips the admission gate; used by the drain shutdown path.
    pub fn decline_new_connections(&self) {
        self.accepts_new_connections.store(false, Ordering::SeqCst);
    }

    fn generate_socket_id(&self) -> SocketId {
        loop {
            let socket_id = SocketId::generate();
            if self.live_socket_ids.insert(socket_id.clone()) {
                return socket_id;
            }
        }
    }

    /// Entry point for an upgraded WebSocket; runs for the lifetime of the
    /// connection.
    pub async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        app_key: String,
        headers: HeaderMap,
        peer_addr: Option<SocketAddr>,
    ) {
        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        // Single writer task: the only place frames touch the transport,
        // which makes per-connection ordering a property of the queue.
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let is_close = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() {
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let origin = headers
            .get(http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let remote_address = Self::resolve_remote_address(&headers, peer_addr);

        let socket_id = self.generate_socket_id();
        let ws_ref = WebSocketRef::new(socket_id.clone(), outbound_tx.clone());

        let app = match self.admit(&app_key, origin.as_deref()).await {
            Ok(app) => app,
            Err(e) => {
                if e.is_fatal_to_connection() {
                    let _ = ws_ref
                        .send_message(&PusherMessage::error(e.close_code(), e.client_message(), None))
                        .await;
                    info!("Connection refused for app key `{}`: {}", app_key, e);
                } else {
                    // Declining new connections closes silently.
                    debug!("Connection refused: {}", e);
                }
                ws_ref.close(e.close_code(), e.client_message()).await;
                self.live_socket_ids.remove(&socket_id);
                let _ = writer.await;
                return;
            }
        };

        {
            let mut ws = ws_ref.inner.lock().await;
            ws.state.app = Some(app.clone());
            ws.state.origin = origin;
            ws.state.remote_address = remote_address;
            ws.state.last_pong_at = Instant::now();
        }

        if ws_ref
            .send_message(&PusherMessage::connection_established(socket_id.to_string()))
            .await
            .is_err()
        {
            self.live_socket_ids.remove(&socket_id);
            let _ = writer.await;
            return;
        }

        {
            let mut manager = self.connection_manager.lock().await;
            if let Err(e) = manager.add_socket(ws_ref.clone(), &app.id).await {
                warn!("Failed to register connection {}: {}", socket_id, e);
                ws_ref.close(4200, "Internal server error".to_string()).await;
                self.live_socket_ids.remove(&socket_id);
                let _ = writer.await;
                return;
            }
        }

        if app.statistics_enabled
            && let Some(statistics) = &self.statistics
        {
            statistics.mark_new_connection(&app.id);
        }
        info!("New connection {} on app {}", socket_id, app.id);

        self.set_activity_timeout(&app, &ws_ref).await;

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.on_message(&ws_ref, &app, text.as_str()).await;
                }
                Ok(Message::Binary(_)) => {
                    let _ = ws_ref
                        .send_message(&PusherMessage::error(
                            4200,
                            "Binary frames are not supported".to_string(),
                            None,
                        ))
                        .await;
                }
                Ok(Message::Ping(payload)) => {
                    let _ = outbound_tx.send(Message::Pong(payload));
                }
                Ok(Message::Pong(_)) => {
                    ws_ref.inner.lock().await.update_activity();
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!("Transport error on {}: {}", socket_id, e);
                    break;
                }
            }
        }

        self.on_close(&ws_ref, &app).await;
        ws_ref.close(1000, String::new()).await;
        let _ = writer.await;
    }

    /// Admission sequence; the first failure aborts the connection. Backend
    /// lookups are bounded, elapse counts as the corresponding failure.
    pub async fn admit(&self, app_key: &str, origin: Option<&str>) -> Result<App> {
        if !self.accepts_new_connections() {
            return Err(Error::Connection(
                "New connections are not accepted".to_string(),
            ));
        }

        let backend_timeout = Duration::from_secs(ADMISSION_BACKEND_TIMEOUT);

        let app = tokio::time::timeout(backend_timeout, self.app_manager.find_by_key(app_key))
            .await
            .map_err(|_| Error::UnknownAppKey(app_key.to_string()))??
            .ok_or_else(|| Error::UnknownAppKey(app_key.to_string()))?;

        if !app.enabled {
            return Err(Error::ApplicationDisabled);
        }

        if !app.origin_is_allowed(origin) {
            return Err(Error::OriginNotAllowed);
        }

        if let Some(capacity) = app.capacity {
            let count = tokio::time::timeout(backend_timeout, async {
                let manager = self.connection_manager.lock().await;
                manager.get_sockets_count(&app.id).await
            })
            .await
            .map_err(|_| Error::OverCapacity)??;

            if count >= capacity as usize {
                return Err(Error::OverCapacity);
            }
        }

        Ok(app)
    }

    /// First `X-Forwarded-For` entry, falling back to the transport peer.
    fn resolve_remote_address(headers: &HeaderMap, peer_addr: Option<SocketAddr>) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| peer_addr.map(|addr| addr.ip().to_string()))
    }

    /// Routes one inbound text frame.
    pub async fn on_message(&self, ws_ref: &WebSocketRef, app: &App, raw: &str) {
        if raw.len() > self.server_options.max_request_size_bytes() {
            let _ = ws_ref
                .send_message(&PusherMessage::error(
                    4200,
                    "Payload too large".to_string(),
                    None,
                ))
                .await;
            return;
        }

        if app.statistics_enabled
            && let Some(statistics) = &self.statistics
        {
            statistics.mark_ws_message_received(&app.id);
        }

        // Ping fast path: answered from a pre-serialised constant before
        // any JSON decode.
        if is_ping_frame(raw) {
            self.handle_ping(ws_ref, app).await;
            return;
        }

        let message: PusherMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!("Malformed frame from {}: {}", ws_ref.socket_id, e);
                let _ = ws_ref
                    .send_message(&PusherMessage::error(
                        4200,
                        "Invalid message format".to_string(),
                        None,
                    ))
                    .await;
                return;
            }
        };

        let event = message.event_name().to_string();
        if event.is_empty() {
            let _ = ws_ref
                .send_message(&PusherMessage::error(
                    4200,
                    "Missing event name".to_string(),
                    None,
                ))
                .await;
            return;
        }

        if let Some(protocol_event) = protocol_event_name(&event) {
            match protocol_event {
                "ping" => self.handle_ping(ws_ref, app).await,
                "pong" => ws_ref.inner.lock().await.update_activity(),
                "subscribe" => self.handle_subscribe(ws_ref, app, &message).await,
                "unsubscribe" => self.handle_unsubscribe(ws_ref, app, &message).await,
                "signin" => self.handle_signin(ws_ref, app, &message).await,
                other => debug!("Ignoring protocol event `pusher:{}`", other),
            }
            return;
        }

        if is_client_event(&event) {
            self.handle_client_event(ws_ref, app, &event, &message).await;
            return;
        }

        self.dispatch_event(ws_ref, app, event, message).await;
    }

    async fn handle_ping(&self, ws_ref: &WebSocketRef, app: &App) {
        {
            let mut ws = ws_ref.inner.lock().await;
            ws.update_activity();
            let _ = ws.send_text(Utf8Bytes::from_static(PRE_SERIALIZED_PONG));
        }
        if app.statistics_enabled
            && let Some(statistics) = &self.statistics
        {
            statistics.mark_ws_message_sent(&app.id);
        }
    }

    /// Hands a non-protocol event to the dispatch engine. When the frame
    /// names a channel the sender must hold an established subscription.
    async fn dispatch_event(
        &self,
        ws_ref: &WebSocketRef,
        app: &App,
        event: String,
        message: PusherMessage,
    ) {
        let channel = message.channel.clone();

        let principal = {
            let ws = ws_ref.inner.lock().await;
            if let Some(channel_name) = &channel
                && !ws.state.is_subscribed(channel_name)
            {
                drop(ws);
                let _ = ws_ref
                    .send_message(&PusherMessage::event_error(
                        &event,
                        Some(channel_name.clone()),
                        json!({ "message": "Subscription not established" }),
                    ))
                    .await;
                return;
            }
            ws.state.principal.clone()
        };

        let origin = DispatchOrigin {
            socket_id: ws_ref.socket_id.clone(),
            app: app.clone(),
            principal,
            channel,
        };
        let data = message
            .data
            .as_ref()
            .map(|d| d.to_value())
            .unwrap_or(Value::Null);

        // Returns as soon as the dispatch task is scheduled.
        let _ = self.dispatch_engine.dispatch(origin, event, data);
    }

    /// Teardown, run exactly once when the transport closes.
    pub async fn on_close(&self, ws_ref: &WebSocketRef, app: &App) {
        let (principal, subscriptions) = {
            let mut ws = ws_ref.inner.lock().await;
            ws.state.timeouts.clear_activity_timeout();
            (
                ws.state.principal.take(),
                ws.state
                    .subscribed_channels
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        };

        if let Some(principal) = &principal {
            let mut manager = self.connection_manager.lock().await;
            let _ = manager
                .remove_user(&app.id, &principal.id, &ws_ref.socket_id)
                .await;
        }

        for channel in subscriptions {
            self.unsubscribe_from_channel(ws_ref, app, &channel).await;
        }

        if app.statistics_enabled
            && let Some(statistics) = &self.statistics
        {
            statistics.mark_disconnection(&app.id);
        }

        {
            let mut manager = self.connection_manager.lock().await;
            let _ = manager.remove_connection(&ws_ref.socket_id, &app.id).await;
        }
        self.live_socket_ids.remove(&ws_ref.socket_id);

        info!("Connection {} on app {} closed", ws_ref.socket_id, app.id);
    }

    /// Drains every local connection; used by soft shutdown.
    pub async fn close_all_connections(&self, code: u16, reason: &str) {
        let namespaces = {
            let mut manager = self.connection_manager.lock().await;
            manager.get_namespaces().await.unwrap_or_default()
        };

        for namespace in namespaces {
            let sockets: Vec<WebSocketRef> = namespace
                .sockets
                .iter()
                .map(|e| e.value().clone())
                .collect();
            for ws_ref in sockets {
                let app = { ws_ref.inner.lock().await.state.app.clone() };
                if let Some(app) = app {
                    self.on_close(&ws_ref, &app).await;
                }
                ws_ref.close(code, reason.to_string()).await;
            }
        }
    }
}

/// Byte-level match for the two accepted ping spellings; runs before any
/// JSON decode.
fn is_ping_frame(raw: &str) -> bool {
    raw.len() <= 64 && (raw.contains("\"pusher:ping\"") || raw.contains("\"pusher.ping\""))
}
