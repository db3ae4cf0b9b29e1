use crate::adapter::ConnectionManager;
use crate::protocol::messages::{MessageData, PusherMessage};
use crate::websocket::SocketId;
use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One newline-delimited request frame from a local peer process.
#[derive(Debug, Deserialize)]
struct BroadcastCommand {
    event: String,
    channel: String,
    #[serde(default)]
    data: Value,
    /// When present, whisper to these socket ids among the channel members.
    #[serde(default)]
    sockets: Option<Vec<String>>,
    /// Otherwise broadcast to the channel minus these socket ids.
    #[serde(default)]
    exclude_sockets: Option<Vec<String>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct BroadcastResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BroadcastResponse {
    fn ok() -> Self {
        Self {
            success: true,
            warning: None,
            error: None,
        }
    }

    fn warn(warning: &str) -> Self {
        Self {
            success: true,
            warning: Some(warning.to_string()),
            error: None,
        }
    }

    fn fail(error: String) -> Self {
        Self {
            success: false,
            warning: None,
            error: Some(error),
        }
    }
}

/// Unix-domain control socket: local peer processes inject broadcasts and
/// whispers into running channels, one JSON frame per line.
///
/// The listener is strictly best-effort infrastructure; failing to bind
/// disables the feature but never the broker.
pub struct LocalBroadcastListener {
    path: PathBuf,
    connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
}

impl LocalBroadcastListener {
    pub fn new(
        path: impl Into<PathBuf>,
        connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
    ) -> Self {
        Self {
            path: path.into(),
            connection_manager,
        }
    }

    /// Binds the socket and spawns the accept loop. A stale socket file is
    /// unlinked first. Returns `None` when binding fails.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.path.exists()
            && let Err(e) = std::fs::remove_file(&self.path)
        {
            warn!("Cannot remove stale control socket {:?}: {}", self.path, e);
        }

        let listener = match UnixListener::bind(&self.path) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Broadcast socket disabled, cannot bind {:?}: {}",
                    self.path, e
                );
                return None;
            }
        };

        // Local peers of any uid may write to the socket.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o666))
            {
                warn!("Cannot set control socket permissions: {}", e);
            }
        }

        info!("Broadcast socket listening on {:?}", self.path);
        let connection_manager = self.connection_manager;

        Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let manager = connection_manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, manager).await {
                                debug!("Control socket client ended: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Control socket accept failed: {}", e);
                    }
                }
            }
        }))
    }
}

/// Serves one peer: requests are processed strictly in arrival order and
/// each gets exactly one response line.
async fn handle_client(
    stream: UnixStream,
    connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = process_frame(&connection_manager, &line).await;
        let mut serialized = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"success":false,"error":"response serialization failed"}"#.to_string()
        });
        serialized.push('\n');
        write_half.write_all(serialized.as_bytes()).await?;
    }

    Ok(())
}

pub async fn process_frame(
    connection_manager: &Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
    line: &str,
) -> BroadcastResponse {
    let command: BroadcastCommand = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => return BroadcastResponse::fail(format!("invalid frame: {e}")),
    };

    if command.event.is_empty() {
        return BroadcastResponse::fail("missing event".to_string());
    }

    let namespaces = {
        let mut manager = connection_manager.lock().await;
        manager.get_namespaces().await.unwrap_or_default()
    };

    // The control frame names no app; the broadcast applies to every app
    // holding a channel of that name on this node.
    let occupied: Vec<_> = namespaces
        .into_iter()
        .filter(|ns| ns.channel_exists(&command.channel))
        .collect();

    if occupied.is_empty() {
        return BroadcastResponse::warn("No channel subscribers");
    }

    let message = PusherMessage {
        event: Some(command.event.clone()),
        channel: Some(command.channel.clone()),
        data: Some(MessageData::Json(command.data.clone())),
        ..Default::default()
    };
    let serialized = match serde_json::to_string(&message) {
        Ok(serialized) => serialized,
        Err(e) => return BroadcastResponse::fail(format!("unserializable payload: {e}")),
    };
    let frame = Utf8Bytes::from(serialized);

    for namespace in occupied {
        match &command.sockets {
            // Whisper: targeted sends among the current channel members.
            Some(sockets) => {
                for socket_id in sockets {
                    let socket_id = SocketId(socket_id.clone());
                    if !namespace.is_in_channel(&command.channel, &socket_id) {
                        continue;
                    }
                    if let Some(ws) = namespace.get_connection(&socket_id)
                        && let Err(e) = ws.send_broadcast(frame.clone())
                    {
                        debug!("Control whisper to {} dropped: {}", socket_id, e);
                    }
                }
            }
            // Broadcast to the remainder after exclusions.
            None => {
                let excluded = command.exclude_sockets.clone().unwrap_or_default();
                for ws in namespace.get_channel_socket_refs_except(&command.channel, None) {
                    if excluded.iter().any(|id| id == ws.socket_id.as_str()) {
                        continue;
                    }
                    if let Err(e) = ws.send_broadcast(frame.clone()) {
                        debug!("Control broadcast to {} dropped: {}", ws.socket_id, e);
                    }
                }
            }
        }
    }

    BroadcastResponse::ok()
}
