use crate::protocol::constants::{
    ACTIVITY_TIMEOUT, CONNECTION_ESTABLISHED_EVENT, ERROR_EVENT, MEMBER_ADDED_EVENT,
    MEMBER_REMOVED_EVENT, PONG_EVENT, SIGNIN_SUCCESS_EVENT, SUBSCRIPTION_SUCCEEDED_EVENT,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// One wire frame of the Pusher protocol, inbound or outbound.
///
/// Per the protocol, `data` on most outbound events is a JSON-encoded
/// *string* (nested encoding); inbound frames may carry either a string or
/// a structured object, so [`MessageData`] is untagged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PusherMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageData {
    Structured {
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth: Option<String>,
        #[serde(flatten)]
        extra: HashMap<String, Value>,
    },
    Json(Value),
    String(String),
}

impl MessageData {
    /// Collapses any variant into a plain JSON value. Structured data is
    /// reassembled into the object it was parsed from.
    pub fn to_value(&self) -> Value {
        match self {
            MessageData::String(s) => Value::String(s.clone()),
            MessageData::Json(v) => v.clone(),
            MessageData::Structured {
                channel,
                channel_data,
                auth,
                extra,
            } => {
                let mut map = serde_json::Map::new();
                if let Some(channel) = channel {
                    map.insert("channel".to_string(), Value::String(channel.clone()));
                }
                if let Some(channel_data) = channel_data {
                    map.insert(
                        "channel_data".to_string(),
                        Value::String(channel_data.clone()),
                    );
                }
                if let Some(auth) = auth {
                    map.insert("auth".to_string(), Value::String(auth.clone()));
                }
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
                Value::Object(map)
            }
        }
    }
}

/// Presence channel roster included in `subscription_succeeded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceData {
    pub ids: Vec<String>,
    pub hash: HashMap<String, Option<Value>>,
    pub count: usize,
}

impl PusherMessage {
    pub fn connection_established(socket_id: String) -> Self {
        let data = json!({
            "socket_id": socket_id,
            "activity_timeout": ACTIVITY_TIMEOUT,
        });
        Self {
            event: Some(CONNECTION_ESTABLISHED_EVENT.to_string()),
            data: Some(MessageData::String(data.to_string())),
            ..Default::default()
        }
    }

    pub fn pong() -> Self {
        Self {
            event: Some(PONG_EVENT.to_string()),
            ..Default::default()
        }
    }

    /// Server-initiated heartbeat. The colon form is what deployed clients
    /// answer to.
    pub fn ping() -> Self {
        Self {
            event: Some("pusher:ping".to_string()),
            ..Default::default()
        }
    }

    pub fn error(code: u16, message: String, channel: Option<String>) -> Self {
        Self {
            event: Some(ERROR_EVENT.to_string()),
            channel,
            data: Some(MessageData::Json(json!({
                "message": message,
                "code": code,
            }))),
            ..Default::default()
        }
    }

    pub fn subscription_succeeded(channel: String, presence: Option<PresenceData>) -> Self {
        let data = match presence {
            Some(presence) => json!({ "presence": presence }).to_string(),
            None => "{}".to_string(),
        };
        Self {
            event: Some(SUBSCRIPTION_SUCCEEDED_EVENT.to_string()),
            channel: Some(channel),
            data: Some(MessageData::String(data)),
            ..Default::default()
        }
    }

    pub fn member_added(channel: String, user_id: String, user_info: Option<Value>) -> Self {
        let data = match user_info {
            Some(info) => json!({ "user_id": user_id, "user_info": info }),
            None => json!({ "user_id": user_id }),
        };
        Self {
            event: Some(MEMBER_ADDED_EVENT.to_string()),
            channel: Some(channel),
            data: Some(MessageData::String(data.to_string())),
            ..Default::default()
        }
    }

    pub fn member_removed(channel: String, user_id: String) -> Self {
        Self {
            event: Some(MEMBER_REMOVED_EVENT.to_string()),
            channel: Some(channel),
            data: Some(MessageData::String(json!({ "user_id": user_id }).to_string())),
            ..Default::default()
        }
    }

    /// A plain channel event, as produced by the HTTP trigger API and the
    /// local broadcast socket.
    pub fn channel_event(event: &str, channel: &str, data: Value) -> Self {
        Self {
            event: Some(event.to_string()),
            channel: Some(channel.to_string()),
            data: Some(MessageData::String(data.to_string())),
            ..Default::default()
        }
    }

    pub fn signin_success(user_data: String) -> Self {
        Self {
            event: Some(SIGNIN_SUCCESS_EVENT.to_string()),
            data: Some(MessageData::Json(json!({ "user_data": user_data }))),
            ..Default::default()
        }
    }

    /// `<event>:response` reply carrying a handler's success payload back to
    /// the originating connection.
    pub fn event_response(event: &str, channel: Option<String>, payload: Value) -> Self {
        Self {
            event: Some(format!("{event}:response")),
            channel,
            data: Some(MessageData::Json(payload)),
            ..Default::default()
        }
    }

    /// `<event>:progress` intermediate reply; any number may precede the
    /// terminal envelope.
    pub fn event_progress(event: &str, channel: Option<String>, payload: Value) -> Self {
        Self {
            event: Some(format!("{event}:progress")),
            channel,
            data: Some(MessageData::Json(payload)),
            ..Default::default()
        }
    }

    /// `<event>:error` reply for message-scoped failures; the connection
    /// stays open.
    pub fn event_error(event: &str, channel: Option<String>, payload: Value) -> Self {
        Self {
            event: Some(format!("{event}:error")),
            channel,
            data: Some(MessageData::Json(payload)),
            ..Default::default()
        }
    }

    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("")
    }
}
