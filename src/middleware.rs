use crate::adapter::ConnectionHandler;
use crate::app::auth::AuthValidator;
use crate::http_handler::AppError;
use axum::{
    body::Body,
    extract::State,
    http::Request as HttpRequest,
    middleware::Next,
    response::Response,
};
use std::{collections::BTreeMap, sync::Arc};

/// Query parameters for the signature map; `auth_signature` itself is
/// excluded from the canonical string.
fn get_params_for_signature(
    query_str_option: Option<&str>,
) -> Result<BTreeMap<String, String>, AppError> {
    let mut params_map = BTreeMap::new();
    if let Some(query_str) = query_str_option {
        for (key, value) in serde_urlencoded::from_str::<Vec<(String, String)>>(query_str)
            .map_err(|e| {
                AppError::InvalidInput(format!(
                    "Failed to parse query string for signature map: {}",
                    e
                ))
            })?
        {
            params_map.insert(key, value);
        }
    }
    Ok(params_map)
}

/// `/apps/{app_id}/...` path segment the API routes are mounted under.
fn app_id_from_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "apps")?;
    segments.next()
}

/// Axum middleware authenticating signed API requests.
///
/// Verifies the `auth_signature` query parameter against the HMAC of the
/// canonical request string (method, path, sorted parameters, `body_md5`
/// of a non-empty body) under the app secret. Both an unknown app and a
/// signature mismatch answer 401.
pub async fn pusher_api_auth_middleware(
    State(handler_state): State<Arc<ConnectionHandler>>,
    request: HttpRequest<Body>,
    next: Next,
) -> Result<Response, AppError> {
    tracing::debug!("Entering API auth middleware");

    let uri = request.uri().clone();
    let method = request.method().clone();
    let path = uri.path().to_string();

    let params = get_params_for_signature(uri.query())?;
    if !params.contains_key("auth_signature") {
        tracing::warn!("Missing auth_signature for API request to {}", path);
        return Err(AppError::ApiAuthFailed(
            "Missing auth_signature".to_string(),
        ));
    }

    let app_id = app_id_from_path(&path)
        .ok_or_else(|| AppError::InvalidInput("Missing app id in path".to_string()))?
        .to_string();

    // The body feeds body_md5 and must be handed to the route handler
    // afterwards, so buffer it here.
    let (parts, body) = request.into_parts();
    let size_limit = handler_state.server_options.max_request_size_bytes();
    let body_bytes = axum::body::to_bytes(body, size_limit).await.map_err(|e| {
        tracing::warn!("Request body over limit or unreadable: {}", e);
        AppError::PayloadTooLarge(format!("Request body rejected: {e}"))
    })?;

    let auth_validator = AuthValidator::new(handler_state.app_manager.clone());
    let body_arg = (!body_bytes.is_empty()).then_some(body_bytes.as_ref());

    match auth_validator
        .validate_api_request(&app_id, method.as_str(), &path, &params, body_arg)
        .await
    {
        Ok(true) => {
            tracing::debug!("API authentication successful for {}", path);
            let request = HttpRequest::from_parts(parts, Body::from(body_bytes));
            Ok(next.run(request).await)
        }
        Ok(false) => {
            tracing::warn!("API authentication failed for {}", path);
            Err(AppError::ApiAuthFailed("Invalid API signature".to_string()))
        }
        Err(e) => {
            tracing::warn!("API authentication errored for {}: {}", path, e);
            Err(e.into())
        }
    }
}
