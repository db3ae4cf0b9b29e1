use crate::app::manager::AppManager;
use crate::error::{Error, Result};
use crate::token::{Token, secure_compare};
use crate::websocket::SocketId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Validates the two signed surfaces that consult the app secret outside of
/// channel subscription: user sign-in frames and the HTTP API.
pub struct AuthValidator {
    app_manager: Arc<dyn AppManager + Send + Sync>,
}

impl AuthValidator {
    pub fn new(app_manager: Arc<dyn AppManager + Send + Sync>) -> Self {
        Self { app_manager }
    }

    /// Sign-in auth string check. The signed message is
    /// `<socket_id>::user::<user_data>`, the auth string `key:hex_hmac`.
    pub async fn validate_signin_auth(
        &self,
        socket_id: &SocketId,
        app_key: &str,
        user_data: &str,
        auth: &str,
    ) -> Result<bool> {
        let app = self
            .app_manager
            .find_by_key(app_key)
            .await?
            .ok_or_else(|| Error::UnknownAppKey(app_key.to_string()))?;

        let expected = Self::signin_signature(&app.key, &app.secret, socket_id, user_data);
        Ok(secure_compare(auth, &expected))
    }

    pub fn signin_signature(
        app_key: &str,
        app_secret: &str,
        socket_id: &SocketId,
        user_data: &str,
    ) -> String {
        let token = Token::new(app_key.to_string(), app_secret.to_string());
        format!(
            "{}:{}",
            app_key,
            token.sign(&format!("{socket_id}::user::{user_data}"))
        )
    }

    /// Verifies a signed HTTP API request.
    ///
    /// The canonical string is `<METHOD>\n<path>\nkey1=value1&key2=value2...`
    /// over the lexicographically sorted query parameters, excluding
    /// `auth_signature`, `body_md5`, `appId`, `appKey` and `channelName`;
    /// when the body is non-empty, `body_md5` is recomputed from it and
    /// included. Both a missing app and a signature mismatch fail closed.
    pub async fn validate_api_request(
        &self,
        app_id: &str,
        method: &str,
        path: &str,
        query_params: &BTreeMap<String, String>,
        body: Option<&[u8]>,
    ) -> Result<bool> {
        let app = self
            .app_manager
            .find_by_id(app_id)
            .await?
            .ok_or_else(|| Error::UnknownAppKey(app_id.to_string()))?;

        let provided_signature = query_params
            .get("auth_signature")
            .ok_or_else(|| Error::Auth("Missing auth_signature".to_string()))?;

        if let Some(auth_key) = query_params.get("auth_key")
            && auth_key != &app.key
        {
            return Ok(false);
        }

        let canonical = Self::canonical_request_string(method, path, query_params, body);
        let token = Token::new(app.key.clone(), app.secret.clone());
        Ok(token.verify(&canonical, provided_signature))
    }

    pub fn canonical_request_string(
        method: &str,
        path: &str,
        query_params: &BTreeMap<String, String>,
        body: Option<&[u8]>,
    ) -> String {
        const EXCLUDED: [&str; 5] = [
            "auth_signature",
            "body_md5",
            "appId",
            "appKey",
            "channelName",
        ];

        let mut params: BTreeMap<String, String> = query_params
            .iter()
            .filter(|(k, _)| !EXCLUDED.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(body) = body
            && !body.is_empty()
        {
            params.insert("body_md5".to_string(), format!("{:x}", md5::compute(body)));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}\n{}\n{}", method.to_uppercase(), path, query)
    }
}
