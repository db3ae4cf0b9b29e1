use super::PresenceMemberInfo;
use super::types::ChannelType;
use crate::adapter::ConnectionManager;
use crate::app::config::App;
use crate::error::Error;
use crate::protocol::messages::MessageData;
use crate::token::{Token, secure_compare};
use crate::websocket::SocketId;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
    /// Whether this subscribe changed membership; a re-subscribe of an
    /// already-subscribed socket is a no-op and must not re-emit events.
    pub newly_added: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_connections: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<PresenceMemberInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub left: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_connections: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<PresenceMemberInfo>,
}

/// Subscription front of the channel registry: validates auth, parses
/// presence payloads and drives membership through the connection manager.
pub struct ChannelManager {
    connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>,
}

// Static cache for channel types to avoid repeated prefix parsing
static CHANNEL_TYPE_CACHE: std::sync::LazyLock<Cache<String, ChannelType>> =
    std::sync::LazyLock::new(|| Cache::builder().max_capacity(1000).build());

impl ChannelManager {
    pub fn new(connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>>) -> Self {
        Self { connection_manager }
    }

    pub async fn get_channel_type(channel_name: &str) -> ChannelType {
        if let Some(channel_type) = CHANNEL_TYPE_CACHE.get(channel_name).await {
            return channel_type;
        }

        let channel_type = ChannelType::from_name(channel_name);
        CHANNEL_TYPE_CACHE
            .insert(channel_name.to_string(), channel_type)
            .await;

        channel_type
    }

    /// Adds the socket to the channel. Auth must already be verified for
    /// private/presence channels; `is_authenticated` carries that verdict.
    pub async fn subscribe(
        &self,
        socket_id: &str,
        data: &Option<MessageData>,
        channel_name: &str,
        is_authenticated: bool,
        app_id: &str,
    ) -> Result<JoinResponse, Error> {
        let channel_type = Self::get_channel_type(channel_name).await;

        if channel_type.requires_authentication() && !is_authenticated {
            return Err(Error::Auth("Invalid signature".into()));
        }

        let socket_id_owned = SocketId(socket_id.to_string());

        // Parse presence data early to fail fast before any locking
        let member = if channel_type == ChannelType::Presence {
            Some(Self::parse_presence_data(data)?)
        } else {
            None
        };

        let (was_newly_added, total_connections) = {
            let mut conn_mgr = self.connection_manager.lock().await;

            let newly_added = conn_mgr
                .add_to_channel(app_id, channel_name, &socket_id_owned)
                .await?;

            if newly_added && let Some(member) = &member {
                conn_mgr
                    .add_presence_member(app_id, channel_name, &socket_id_owned, member.clone())
                    .await;
            }

            let total = conn_mgr
                .get_channel_socket_count(app_id, channel_name)
                .await;

            (newly_added, total)
        };

        // Member data only accompanies an initial subscription
        let response_member = if was_newly_added { member } else { None };

        Ok(JoinResponse {
            success: true,
            newly_added: was_newly_added,
            channel_connections: Some(total_connections),
            member: response_member,
        })
    }

    /// Removes the socket from the channel; for presence channels the
    /// departing member identity is returned so the caller can decide
    /// whether a `member_removed` is due.
    pub async fn unsubscribe(
        &self,
        socket_id: &str,
        channel_name: &str,
        app_id: &str,
    ) -> Result<LeaveResponse, Error> {
        let socket_id_owned = SocketId(socket_id.to_string());
        let channel_type = Self::get_channel_type(channel_name).await;

        let (socket_removed, remaining_connections, member) = {
            let mut conn_mgr = self.connection_manager.lock().await;

            let member = if channel_type == ChannelType::Presence {
                conn_mgr
                    .remove_presence_member(app_id, channel_name, &socket_id_owned)
                    .await
            } else {
                None
            };

            let socket_removed = conn_mgr
                .remove_from_channel(app_id, channel_name, &socket_id_owned)
                .await?;

            let remaining = conn_mgr
                .get_channel_socket_count(app_id, channel_name)
                .await;

            (socket_removed, remaining, member)
        };

        Ok(LeaveResponse {
            left: socket_removed,
            remaining_connections: Some(remaining_connections),
            member,
        })
    }

    pub(crate) fn parse_presence_data(
        data: &Option<MessageData>,
    ) -> Result<PresenceMemberInfo, Error> {
        let message_data = data
            .as_ref()
            .ok_or_else(|| Error::Channel("Missing presence data".into()))?;

        let channel_data_str = match message_data {
            MessageData::Structured { channel_data, .. } => channel_data
                .clone()
                .ok_or_else(|| Error::Channel("Missing channel_data".into()))?,
            MessageData::Json(value) => value
                .get("channel_data")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| Error::Channel("Missing channel_data".into()))?,
            MessageData::String(_) => {
                return Err(Error::Channel("Invalid presence data format".into()));
            }
        };

        let user_data: Value = serde_json::from_str(&channel_data_str)
            .map_err(|_| Error::Channel("Invalid JSON in channel_data".into()))?;

        let user_id = user_data
            .get("user_id")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| Error::Channel("Missing user_id in channel_data".into()))?;

        let user_info = user_data.get("user_info").cloned().or(Some(json!({})));

        Ok(PresenceMemberInfo { user_id, user_info })
    }

    /// Validates the `key:hex_hmac` auth string of a subscribe request.
    pub fn signature_is_valid(
        &self,
        app_config: &App,
        socket_id: &SocketId,
        signature: &str,
        channel_name: &str,
        channel_data: Option<&str>,
    ) -> bool {
        let expected =
            Self::get_expected_signature(app_config, socket_id, channel_name, channel_data);
        secure_compare(signature, &expected)
    }

    pub fn get_expected_signature(
        app_config: &App,
        socket_id: &SocketId,
        channel_name: &str,
        channel_data: Option<&str>,
    ) -> String {
        let token = Token::new(app_config.key.clone(), app_config.secret.clone());
        format!(
            "{}:{}",
            app_config.key,
            token.sign(&Self::get_data_to_sign(socket_id, channel_name, channel_data))
        )
    }

    /// `<socket_id>:<channel>` for private channels,
    /// `<socket_id>:<channel>:<channel_data>` for presence.
    fn get_data_to_sign(
        socket_id: &SocketId,
        channel_name: &str,
        channel_data: Option<&str>,
    ) -> String {
        let socket_id_str = socket_id.to_string();
        let is_presence = channel_name.starts_with("presence-");

        match channel_data {
            Some(channel_data) if is_presence && !channel_data.is_empty() => {
                let mut result = String::with_capacity(
                    socket_id_str.len() + 2 + channel_name.len() + channel_data.len(),
                );
                result.push_str(&socket_id_str);
                result.push(':');
                result.push_str(channel_name);
                result.push(':');
                result.push_str(channel_data);
                result
            }
            _ => {
                let mut result =
                    String::with_capacity(socket_id_str.len() + 1 + channel_name.len());
                result.push_str(&socket_id_str);
                result.push(':');
                result.push_str(channel_name);
                result
            }
        }
    }

    pub async fn get_channel_members(
        &self,
        app_id: &str,
        channel: &str,
    ) -> Result<std::collections::HashMap<String, PresenceMemberInfo>, Error> {
        let mut conn_mgr = self.connection_manager.lock().await;
        conn_mgr.get_channel_members(app_id, channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_signature_covers_socket_and_channel() {
        let app = App {
            id: "1".into(),
            key: "key".into(),
            secret: "secret".into(),
            ..Default::default()
        };
        let socket_id = SocketId("1234.5678".into());
        let token = Token::new("key".into(), "secret".into());
        let expected = format!("key:{}", token.sign("1234.5678:private-room"));

        assert_eq!(
            ChannelManager::get_expected_signature(&app, &socket_id, "private-room", None),
            expected
        );
    }

    #[test]
    fn presence_signature_includes_channel_data() {
        let app = App {
            id: "1".into(),
            key: "key".into(),
            secret: "secret".into(),
            ..Default::default()
        };
        let socket_id = SocketId("1234.5678".into());
        let channel_data = r#"{"user_id":"u1"}"#;
        let token = Token::new("key".into(), "secret".into());
        let expected = format!(
            "key:{}",
            token.sign(&format!("1234.5678:presence-room:{channel_data}"))
        );

        assert_eq!(
            ChannelManager::get_expected_signature(
                &app,
                &socket_id,
                "presence-room",
                Some(channel_data)
            ),
            expected
        );
    }

    #[test]
    fn presence_data_requires_user_id() {
        let data = Some(MessageData::Structured {
            channel: Some("presence-room".into()),
            channel_data: Some(r#"{"user_info":{"name":"x"}}"#.into()),
            auth: None,
            extra: Default::default(),
        });
        assert!(ChannelManager::parse_presence_data(&data).is_err());

        let data = Some(MessageData::Structured {
            channel: Some("presence-room".into()),
            channel_data: Some(r#"{"user_id":"u1","user_info":{"name":"x"}}"#.into()),
            auth: None,
            extra: Default::default(),
        });
        let member = ChannelManager::parse_presence_data(&data).unwrap();
        assert_eq!(member.user_id, "u1");
    }

    #[test]
    fn numeric_user_ids_are_stringified() {
        let data = Some(MessageData::Structured {
            channel: None,
            channel_data: Some(r#"{"user_id":42}"#.into()),
            auth: None,
            extra: Default::default(),
        });
        let member = ChannelManager::parse_presence_data(&data).unwrap();
        assert_eq!(member.user_id, "42");
    }
}
