use super::ConnectionHandler;
use super::types::{SubscriptionRequest, UnsubscribeRequest};
use crate::app::config::App;
use crate::channel::{ChannelManager, PresenceMemberInfo};
use crate::protocol::messages::{PresenceData, PusherMessage};
use crate::websocket::{Principal, WebSocketRef};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

impl ConnectionHandler {
    pub async fn handle_subscribe(
        &self,
        ws_ref: &WebSocketRef,
        app: &App,
        message: &PusherMessage,
    ) {
        let request = match SubscriptionRequest::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(4200, e.client_message(), None))
                    .await;
                return;
            }
        };
        let channel_name = request.channel.clone();
        let channel_type = ChannelManager::get_channel_type(&channel_name).await;

        let is_authenticated = match self
            .verify_channel_authentication(app, &ws_ref.socket_id, &request)
            .await
        {
            Ok(valid) => valid,
            Err(e) => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(
                        4009,
                        e.client_message(),
                        Some(channel_name),
                    ))
                    .await;
                return;
            }
        };

        if channel_type.requires_authentication() && !is_authenticated {
            // Subscription auth failure is channel-scoped; the connection
            // stays open.
            let _ = ws_ref
                .send_message(&PusherMessage::error(
                    4009,
                    "Invalid signature".to_string(),
                    Some(channel_name),
                ))
                .await;
            return;
        }

        let join = {
            let channel_manager = self.channel_manager.read().await;
            channel_manager
                .subscribe(
                    ws_ref.socket_id.as_str(),
                    &message.data,
                    &channel_name,
                    is_authenticated,
                    &app.id,
                )
                .await
        };

        let join = match join {
            Ok(join) => join,
            Err(e) => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(
                        e.close_code(),
                        e.client_message(),
                        Some(channel_name),
                    ))
                    .await;
                return;
            }
        };

        if !join.newly_added {
            // Re-subscribe of an already-subscribed socket: a no-op, no
            // duplicate emits.
            debug!(
                "Socket {} already subscribed to {}",
                ws_ref.socket_id, channel_name
            );
            return;
        }

        {
            let mut ws = ws_ref.inner.lock().await;
            ws.state.subscribed_channels.insert(channel_name.clone());
        }

        if channel_type.is_presence() {
            self.finish_presence_subscribe(ws_ref, app, &channel_name, join.member)
                .await;
        } else {
            let _ = ws_ref
                .send_message(&PusherMessage::subscription_succeeded(channel_name, None))
                .await;
        }

        if app.statistics_enabled
            && let Some(statistics) = &self.statistics
        {
            statistics.mark_ws_message_sent(&app.id);
        }
    }

    /// Presence tail of a successful subscribe: roster reply to the joiner
    /// and, on the user's first connection, `member_added` to everyone else.
    async fn finish_presence_subscribe(
        &self,
        ws_ref: &WebSocketRef,
        app: &App,
        channel_name: &str,
        member: Option<PresenceMemberInfo>,
    ) {
        let Some(member) = member else {
            warn!(
                "Presence subscribe on {} without member data",
                channel_name
            );
            return;
        };

        // A presence identity doubles as the connection principal when the
        // client has not signed in.
        {
            let mut ws = ws_ref.inner.lock().await;
            if ws.state.principal.is_none() {
                ws.state.principal = Some(Principal {
                    id: member.user_id.clone(),
                    info: member.user_info.clone().unwrap_or(json!({})),
                });
            }
        }

        let (members, user_connections) = {
            let mut manager = self.connection_manager.lock().await;
            let members = manager
                .get_channel_members(&app.id, channel_name)
                .await
                .unwrap_or_default();
            let user_connections = manager
                .count_user_connections_in_channel(&app.id, channel_name, &member.user_id)
                .await;
            (members, user_connections)
        };

        let _ = ws_ref
            .send_message(&PusherMessage::subscription_succeeded(
                channel_name.to_string(),
                Some(presence_data_from_members(&members)),
            ))
            .await;

        // member_added only on the first connection of this user.
        if user_connections == 1 {
            let added = PusherMessage::member_added(
                channel_name.to_string(),
                member.user_id.clone(),
                member.user_info.clone(),
            );
            let mut manager = self.connection_manager.lock().await;
            if let Err(e) = manager
                .send(channel_name, added, Some(&ws_ref.socket_id), &app.id)
                .await
            {
                warn!("member_added broadcast on {} failed: {}", channel_name, e);
            }
        }
    }

    pub async fn handle_unsubscribe(
        &self,
        ws_ref: &WebSocketRef,
        app: &App,
        message: &PusherMessage,
    ) {
        let request = match UnsubscribeRequest::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(4200, e.client_message(), None))
                    .await;
                return;
            }
        };

        self.unsubscribe_from_channel(ws_ref, app, &request.channel)
            .await;
    }

    /// Shared by explicit unsubscribes and close teardown. Idempotent.
    pub(super) async fn unsubscribe_from_channel(
        &self,
        ws_ref: &WebSocketRef,
        app: &App,
        channel_name: &str,
    ) {
        {
            let mut ws = ws_ref.inner.lock().await;
            ws.state.subscribed_channels.remove(channel_name);
        }

        let leave = {
            let channel_manager = self.channel_manager.read().await;
            channel_manager
                .unsubscribe(ws_ref.socket_id.as_str(), channel_name, &app.id)
                .await
        };

        let leave = match leave {
            Ok(leave) => leave,
            Err(e) => {
                warn!("Unsubscribe from {} failed: {}", channel_name, e);
                return;
            }
        };

        if !leave.left {
            return;
        }

        // member_removed only when the user's last connection departed.
        if let Some(member) = leave.member {
            let remaining = {
                let mut manager = self.connection_manager.lock().await;
                manager
                    .count_user_connections_in_channel(&app.id, channel_name, &member.user_id)
                    .await
            };
            if remaining == 0 {
                let removed = PusherMessage::member_removed(
                    channel_name.to_string(),
                    member.user_id.clone(),
                );
                let mut manager = self.connection_manager.lock().await;
                if let Err(e) = manager
                    .send(channel_name, removed, Some(&ws_ref.socket_id), &app.id)
                    .await
                {
                    warn!("member_removed broadcast on {} failed: {}", channel_name, e);
                }
            }
        }
    }
}

fn presence_data_from_members(members: &HashMap<String, PresenceMemberInfo>) -> PresenceData {
    let ids: Vec<String> = members.keys().cloned().collect();
    let hash = members
        .iter()
        .map(|(user_id, info)| (user_id.clone(), info.user_info.clone()))
        .collect();
    PresenceData {
        ids,
        hash,
        count: members.len(),
    }
}
