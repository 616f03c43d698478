use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{header, request::Parts, HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::{api_key, Identity};
use crate::logging::{ActivityLog, ActivityStatus, ActivityType};
use crate::state::AppState;
use crate::utils::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, PartialEq)]
enum Credential {
    Token(String),
    ApiKey(String),
}

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// Bearer header first (a JWT or an `orin_` key), then `X-API-Key`, then
/// the `api_key` query parameter.
fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Option<Credential> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(value) = bearer {
        return Some(if value.starts_with(api_key::API_KEY_PREFIX) {
            Credential::ApiKey(value.to_string())
        } else {
            Credential::Token(value.to_string())
        });
    }

    if let Some(key) = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(Credential::ApiKey(key.to_string()));
    }

    Query::<ApiKeyQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.api_key)
        .filter(|k| !k.is_empty())
        .map(Credential::ApiKey)
}

/// Resolves the caller and attaches an [`Identity`] to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = match extract_credential(request.headers(), request.uri()) {
        Some(Credential::Token(token)) => state.auth_service.authenticate_token(&token).await?,
        Some(Credential::ApiKey(key)) => state.auth_service.authenticate_api_key(&key).await?,
        None => {
            debug!("Rejected {} {}: no credentials", request.method(), request.uri().path());
            return Err(ApiError::Unauthorized("Not authenticated".into()));
        }
    };

    debug!(
        "Authenticated {} ({}) via {}",
        identity.email,
        identity.department,
        if identity.api_key_id.is_some() { "api key" } else { "token" }
    );
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Must be layered inside [`require_auth`].
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;

    if !identity.is_admin {
        warn!(
            "Non-admin {} denied access to {}",
            identity.email,
            request.uri().path()
        );
        state.activity.log(
            ActivityLog::builder(ActivityType::AdminAccessDenied)
                .actor(identity.user_id, &identity.email)
                .status(ActivityStatus::Denied)
                .detail(request.uri().path())
                .build(),
        );
        return Err(ApiError::Forbidden("Admin access required".into()));
    }

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))
    }
}
