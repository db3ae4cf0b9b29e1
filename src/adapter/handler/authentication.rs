// src/adapter/handler/authentication.rs
use super::ConnectionHandler;
use super::types::*;
use crate::app::auth::AuthValidator;
use crate::app::config::App;
use crate::error::{Error, Result};
use crate::protocol::messages::PusherMessage;
use crate::websocket::{Principal, SocketId, WebSocketRef};
use serde_json::{Value, json};
use tracing::{debug, info};

impl ConnectionHandler {
    /// Signature check for a subscribe request. Public channels pass
    /// trivially; private/presence channels require the `key:hmac` auth
    /// string over `<socket_id>:<channel>[:<channel_data>]`.
    pub async fn verify_channel_authentication(
        &self,
        app_config: &App,
        socket_id: &SocketId,
        request: &SubscriptionRequest,
    ) -> Result<bool> {
        if !request.channel.starts_with("presence-") && !request.channel.starts_with("private-") {
            return Ok(true);
        }

        let signature = request.auth.as_ref().ok_or_else(|| {
            Error::Auth("Authentication signature required for this channel".into())
        })?;

        let channel_manager = self.channel_manager.read().await;
        let is_valid = channel_manager.signature_is_valid(
            app_config,
            socket_id,
            signature,
            &request.channel,
            request.channel_data.as_deref(),
        );

        Ok(is_valid)
    }

    /// `pusher:signin`: installs the authenticated principal and registers
    /// the user for targeted sends. A bad signature closes the connection.
    pub async fn handle_signin(&self, ws_ref: &WebSocketRef, app: &App, message: &PusherMessage) {
        let request = match SignInRequest::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(4200, e.client_message(), None))
                    .await;
                return;
            }
        };

        let auth_validator = AuthValidator::new(self.app_manager.clone());
        let is_valid = auth_validator
            .validate_signin_auth(&ws_ref.socket_id, &app.key, &request.user_data, &request.auth)
            .await
            .unwrap_or(false);

        if !is_valid {
            debug!("Signin rejected for {}", ws_ref.socket_id);
            let _ = ws_ref
                .send_message(&PusherMessage::error(
                    4009,
                    "Connection not authorized.".to_string(),
                    None,
                ))
                .await;
            ws_ref
                .close(4009, "Connection not authorized.".to_string())
                .await;
            return;
        }

        let user_data: Value = match serde_json::from_str(&request.user_data) {
            Ok(value) => value,
            Err(_) => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(
                        4200,
                        "Invalid user_data".to_string(),
                        None,
                    ))
                    .await;
                return;
            }
        };
        let user_id = match user_data.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                let _ = ws_ref
                    .send_message(&PusherMessage::error(
                        4200,
                        "user_data requires an id".to_string(),
                        None,
                    ))
                    .await;
                return;
            }
        };

        {
            let mut ws = ws_ref.inner.lock().await;
            ws.state.principal = Some(Principal {
                id: user_id.clone(),
                info: user_data.get("user_info").cloned().unwrap_or(json!({})),
            });
        }
        {
            let mut manager = self.connection_manager.lock().await;
            let _ = manager
                .add_user(&app.id, &user_id, &ws_ref.socket_id)
                .await;
        }

        info!("Socket {} signed in as user {}", ws_ref.socket_id, user_id);
        let _ = ws_ref
            .send_message(&PusherMessage::signin_success(request.user_data))
            .await;
    }
}
