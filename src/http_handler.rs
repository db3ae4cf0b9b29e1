use crate::adapter::ConnectionHandler;
use crate::channel::ChannelManager;
use crate::error::Error;
use crate::protocol::messages::PusherMessage;
use crate::websocket::SocketId;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// HTTP-surface errors with their protocol status codes.
#[derive(Debug)]
pub enum AppError {
    InvalidInput(String),
    AppNotFound(String),
    ApiAuthFailed(String),
    PayloadTooLarge(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message),
            AppError::AppNotFound(message) => (StatusCode::UNAUTHORIZED, message),
            AppError::ApiAuthFailed(message) => (StatusCode::UNAUTHORIZED, message),
            AppError::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message),
            AppError::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(error: Error) -> Self {
        match error {
            Error::UnknownAppKey(_) => AppError::AppNotFound(error.to_string()),
            Error::Auth(message) => AppError::ApiAuthFailed(message),
            Error::InvalidMessageFormat(message) => AppError::InvalidInput(message),
            Error::PayloadTooLarge(message) => AppError::PayloadTooLarge(message),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

/// `POST /apps/{app_id}/events` body.
#[derive(Debug, Deserialize)]
pub struct TriggerEventBody {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub channel: Option<String>,
    /// Excluded from delivery, mirroring the client-event exclusion.
    #[serde(default)]
    pub socket_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelsQuery {
    #[serde(default)]
    pub filter_by_prefix: Option<String>,
}

/// Liveness probe.
pub async fn up() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Triggers an event on one or more channels of an app.
pub async fn trigger_event(
    State(handler): State<Arc<ConnectionHandler>>,
    Path(app_id): Path<String>,
    Json(body): Json<TriggerEventBody>,
) -> Result<Json<Value>, AppError> {
    let app = handler
        .app_manager
        .find_by_id(&app_id)
        .await?
        .ok_or_else(|| AppError::AppNotFound(format!("Unknown app `{app_id}`")))?;

    let channels = match (body.channels, body.channel) {
        (Some(channels), _) if !channels.is_empty() => channels,
        (_, Some(channel)) => vec![channel],
        _ => {
            return Err(AppError::InvalidInput(
                "Event requires a channel or channels".to_string(),
            ));
        }
    };

    let except = body.socket_id.map(SocketId);
    for channel in &channels {
        let message = PusherMessage::channel_event(&body.name, channel, body.data.clone());
        let mut manager = handler.connection_manager.lock().await;
        if let Err(e) = manager
            .send(channel, message, except.as_ref(), &app.id)
            .await
        {
            debug!("API event on {} failed: {}", channel, e);
        }
    }

    if app.statistics_enabled
        && let Some(statistics) = &handler.statistics
    {
        statistics.mark_api_message(&app.id);
    }

    Ok(Json(json!({})))
}

/// Occupied channels of an app, optionally filtered by prefix.
pub async fn channels_index(
    State(handler): State<Arc<ConnectionHandler>>,
    Path(app_id): Path<String>,
    Query(query): Query<ChannelsQuery>,
) -> Result<Json<Value>, AppError> {
    let counts = {
        let mut manager = handler.connection_manager.lock().await;
        manager.get_channels_with_socket_count(&app_id).await?
    };

    let mut channels: HashMap<String, Value> = HashMap::new();
    for (name, _count) in counts {
        if let Some(prefix) = &query.filter_by_prefix
            && !name.starts_with(prefix.as_str())
        {
            continue;
        }
        let info = if name.starts_with("presence-") {
            let mut manager = handler.connection_manager.lock().await;
            let members = manager.get_channel_members(&app_id, &name).await?;
            json!({ "user_count": members.len() })
        } else {
            json!({})
        };
        channels.insert(name, info);
    }

    Ok(Json(json!({ "channels": channels })))
}

/// Occupancy of one channel.
pub async fn channel_show(
    State(handler): State<Arc<ConnectionHandler>>,
    Path((app_id, channel_name)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let subscription_count = {
        let mut manager = handler.connection_manager.lock().await;
        manager.get_channel_socket_count(&app_id, &channel_name).await
    };

    let mut response = json!({
        "occupied": subscription_count > 0,
        "subscription_count": subscription_count,
    });

    if ChannelManager::get_channel_type(&channel_name).await.is_presence() {
        let members = {
            let mut manager = handler.connection_manager.lock().await;
            manager.get_channel_members(&app_id, &channel_name).await?
        };
        response["user_count"] = json!(members.len());
    }

    Ok(Json(response))
}

/// Presence member ids of one channel.
pub async fn channel_users(
    State(handler): State<Arc<ConnectionHandler>>,
    Path((app_id, channel_name)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    if !ChannelManager::get_channel_type(&channel_name).await.is_presence() {
        return Err(AppError::InvalidInput(
            "Users can only be fetched for presence channels".to_string(),
        ));
    }

    let members = {
        let mut manager = handler.connection_manager.lock().await;
        manager.get_channel_members(&app_id, &channel_name).await?
    };

    let users: Vec<Value> = members.keys().map(|id| json!({ "id": id })).collect();
    Ok(Json(json!({ "users": users })))
}
