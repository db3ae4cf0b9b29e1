#![allow(dead_code)]

use axum::extract::ws::Message;
use beamcast::adapter::local_adapter::LocalAdapter;
use beamcast::adapter::ConnectionHandler;
// Re-exported so `use common::*` brings the trait into scope for method
// calls on the shared manager.
pub use beamcast::adapter::ConnectionManager;
use beamcast::app::config::App;
use beamcast::app::memory_app_manager::MemoryAppManager;
use beamcast::channel::ChannelManager;
use beamcast::dispatch::{DispatchEngine, HandlerResolver};
use beamcast::options::ServerOptions;
use beamcast::websocket::{SocketId, WebSocketRef};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};

pub type SharedConnectionManager = Arc<Mutex<dyn ConnectionManager + Send + Sync>>;

pub fn test_app(id: &str) -> App {
    App {
        id: id.to_string(),
        key: format!("{id}-key"),
        secret: format!("{id}-secret"),
        name: format!("app {id}"),
        client_messages_enabled: true,
        ..Default::default()
    }
}

pub fn local_connection_manager() -> SharedConnectionManager {
    Arc::new(Mutex::new(LocalAdapter::new()))
}

/// A registered connection plus the receiving end of its outbound queue.
pub async fn connect(
    connection_manager: &SharedConnectionManager,
    app_id: &str,
) -> (WebSocketRef, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ws_ref = WebSocketRef::new(SocketId::generate(), tx);
    connection_manager
        .lock()
        .await
        .add_socket(ws_ref.clone(), app_id)
        .await
        .expect("add_socket");
    (ws_ref, rx)
}

/// Builds a full `ConnectionHandler` over in-memory backends.
pub fn build_handler(
    connection_manager: SharedConnectionManager,
    apps: Vec<App>,
) -> Arc<ConnectionHandler> {
    build_handler_with_options(connection_manager, apps, ServerOptions::default())
}

pub fn build_handler_with_options(
    connection_manager: SharedConnectionManager,
    apps: Vec<App>,
    options: ServerOptions,
) -> Arc<ConnectionHandler> {
    let app_manager = Arc::new(MemoryAppManager::with_apps(apps));
    let channel_manager = Arc::new(RwLock::new(ChannelManager::new(connection_manager.clone())));
    let resolver = Arc::new(HandlerResolver::new());
    let dispatch_engine = Arc::new(DispatchEngine::new(resolver, connection_manager.clone()));

    Arc::new(ConnectionHandler::new(
        app_manager,
        channel_manager,
        connection_manager,
        dispatch_engine,
        None,
        Arc::new(options),
    ))
}

/// Next text frame on the queue, parsed as JSON. Panics when the next
/// frame is not text or the queue stays empty past the deadline.
pub async fn next_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection queue closed");
    match frame {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("frame is not JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Asserts that nothing is queued after giving pending tasks a moment.
pub async fn assert_no_frame(rx: &mut mpsc::UnboundedReceiver<Message>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    match rx.try_recv() {
        Err(_) => {}
        Ok(frame) => panic!("expected no frame, got {frame:?}"),
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) {
    while rx.try_recv().is_ok() {}
}
