use super::ConnectionHandler;
use crate::app::config::App;
use crate::protocol::messages::PusherMessage;
use crate::websocket::{ConnectionStatus, WebSocketRef};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

impl ConnectionHandler {
    /// Starts the per-connection activity supervisor: after
    /// `activity_timeout` seconds of silence the server pings; a missing
    /// pong within `pong_timeout` closes the connection with 4201.
    pub async fn set_activity_timeout(&self, app_config: &App, ws_ref: &WebSocketRef) {
        let activity_timeout = Duration::from_secs(self.server_options.activity_timeout);
        let pong_timeout = Duration::from_secs(self.server_options.pong_timeout);
        let supervised = ws_ref.clone();
        let app_id = app_config.id.clone();

        let handle = tokio::spawn(async move {
            sleep(activity_timeout).await;

            loop {
                // Re-check actual idle time; any inbound frame resets it.
                let idle = {
                    let ws = supervised.inner.lock().await;
                    if ws.is_closed() {
                        return;
                    }
                    ws.state.time_since_last_pong()
                };

                if idle < activity_timeout {
                    let remaining = activity_timeout - idle;
                    debug!(
                        "Socket {} active {}s ago, next check in {}s",
                        supervised.socket_id,
                        idle.as_secs(),
                        remaining.as_secs()
                    );
                    sleep(remaining).await;
                    continue;
                }

                let ping_result = {
                    let mut ws = supervised.inner.lock().await;
                    ws.state.status = ConnectionStatus::PingSent(Instant::now());
                    ws.send_message(&PusherMessage::ping())
                };

                match ping_result {
                    Ok(()) => {
                        sleep(pong_timeout).await;

                        let mut ws = supervised.inner.lock().await;
                        if let ConnectionStatus::PingSent(ping_time) = ws.state.status
                            && ping_time.elapsed() >= pong_timeout
                        {
                            warn!(
                                "No pong from socket {} on app {}, closing connection",
                                supervised.socket_id, app_id
                            );
                            ws.close(4201, "Pong reply not received in time".to_string());
                            return;
                        }
                        drop(ws);
                        sleep(activity_timeout).await;
                    }
                    Err(e) => {
                        // Broken outbound queue, the read loop runs the
                        // actual teardown.
                        debug!(
                            "Failed to ping socket {} (likely closed): {}",
                            supervised.socket_id, e
                        );
                        return;
                    }
                }
            }
        });

        let mut ws = ws_ref.inner.lock().await;
        ws.state.timeouts.clear_activity_timeout();
        ws.state.timeouts.activity_handle = Some(handle);
    }
}
