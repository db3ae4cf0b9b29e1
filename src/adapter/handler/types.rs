use crate::error::{Error, Result};
use crate::protocol::messages::{MessageData, PusherMessage};

/// Parsed `pusher:subscribe` payload.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub channel: String,
    pub auth: Option<String>,
    pub channel_data: Option<String>,
}

impl SubscriptionRequest {
    pub fn from_message(message: &PusherMessage) -> Result<Self> {
        let data = message
            .data
            .as_ref()
            .ok_or_else(|| Error::InvalidMessageFormat("Subscribe requires data".into()))?;

        match data {
            MessageData::Structured {
                channel,
                channel_data,
                auth,
                ..
            } => {
                let channel = channel
                    .clone()
                    .or_else(|| message.channel.clone())
                    .ok_or_else(|| {
                        Error::InvalidMessageFormat("Subscribe requires a channel".into())
                    })?;
                Ok(Self {
                    channel,
                    auth: auth.clone(),
                    channel_data: channel_data.clone(),
                })
            }
            MessageData::Json(value) => {
                let channel = value
                    .get("channel")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| message.channel.clone())
                    .ok_or_else(|| {
                        Error::InvalidMessageFormat("Subscribe requires a channel".into())
                    })?;
                Ok(Self {
                    channel,
                    auth: value
                        .get("auth")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    channel_data: value
                        .get("channel_data")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                })
            }
            MessageData::String(_) => Err(Error::InvalidMessageFormat(
                "Subscribe data must be an object".into(),
            )),
        }
    }
}

/// Parsed `pusher:unsubscribe` payload; the channel may sit in the data or
/// on the frame itself.
#[derive(Debug, Clone)]
pub struct UnsubscribeRequest {
    pub channel: String,
}

impl UnsubscribeRequest {
    pub fn from_message(message: &PusherMessage) -> Result<Self> {
        let channel = match &message.data {
            Some(MessageData::Structured { channel, .. }) => channel.clone(),
            Some(MessageData::Json(value)) => value
                .get("channel")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
        .or_else(|| message.channel.clone())
        .ok_or_else(|| Error::InvalidMessageFormat("Unsubscribe requires a channel".into()))?;

        Ok(Self { channel })
    }
}

/// Parsed `pusher:signin` payload.
#[derive(Debug, Clone)]
pub struct SignInRequest {
    pub user_data: String,
    pub auth: String,
}

impl SignInRequest {
    pub fn from_message(message: &PusherMessage) -> Result<Self> {
        let data = message
            .data
            .as_ref()
            .ok_or_else(|| Error::InvalidMessageFormat("Signin requires data".into()))?;
        let value = data.to_value();

        let user_data = value
            .get("user_data")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidMessageFormat("Signin requires user_data".into()))?;
        let auth = value
            .get("auth")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidMessageFormat("Signin requires auth".into()))?;

        Ok(Self { user_data, auth })
    }
}
