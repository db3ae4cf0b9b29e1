use super::ConnectionHandler;
use crate::app::config::App;
use crate::channel::ChannelManager;
use crate::protocol::messages::PusherMessage;
use crate::websocket::WebSocketRef;
use tracing::{debug, warn};

impl ConnectionHandler {
    /// `client-*` events: relayed verbatim to the other members of the
    /// channel when the app permits them. The sender is always excluded;
    /// policy or subscription violations drop the frame without any reply.
    pub async fn handle_client_event(
        &self,
        ws_ref: &WebSocketRef,
        app: &App,
        event: &str,
        message: &PusherMessage,
    ) {
        if !app.client_messages_enabled {
            debug!(
                "Client event `{}` dropped, app {} does not permit client messages",
                event, app.id
            );
            return;
        }

        let Some(channel_name) = message.channel.clone() else {
            debug!("Client event `{}` dropped, no channel named", event);
            return;
        };

        let subscribed = {
            let ws = ws_ref.inner.lock().await;
            ws.state.is_subscribed(&channel_name)
        };
        if !subscribed {
            debug!(
                "Client event `{}` dropped, {} is not subscribed to {}",
                event, ws_ref.socket_id, channel_name
            );
            return;
        }

        // On presence channels the relayed frame carries the sender's
        // user id.
        let channel_type = ChannelManager::get_channel_type(&channel_name).await;
        let user_id = if channel_type.is_presence() {
            let mut manager = self.connection_manager.lock().await;
            manager
                .get_presence_member(&app.id, &channel_name, &ws_ref.socket_id)
                .await
                .map(|member| member.user_id)
        } else {
            None
        };

        let outbound = PusherMessage {
            event: Some(event.to_string()),
            channel: Some(channel_name.clone()),
            data: message.data.clone(),
            user_id,
            name: None,
        };

        let mut manager = self.connection_manager.lock().await;
        if let Err(e) = manager
            .send(&channel_name, outbound, Some(&ws_ref.socket_id), &app.id)
            .await
        {
            warn!("Client event `{}` broadcast failed: {}", event, e);
        }
    }
}
