use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::models::api_key::ApiKeyInfo;
use crate::models::auth::{
    CreateApiKeyRequest, CreatedApiKey, LoginRequest, RegisterRequest, TokenResponse,
    UpdateProfileRequest,
};
use crate::models::user::UserProfile;
use crate::services::AuthService;
use crate::utils::error::ApiResult;

#[derive(Serialize)]
pub struct VerifyResponse {
    valid: bool,
    user_id: Uuid,
    email: String,
    department: String,
    is_admin: bool,
    auth_method: &'static str,
}

pub async fn register(
    State(auth): State<Arc<AuthService>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    Ok((StatusCode::CREATED, Json(auth.register(req).await?)))
}

pub async fn login(
    State(auth): State<Arc<AuthService>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    Ok(Json(auth.login(req).await?))
}

pub async fn profile(
    State(auth): State<Arc<AuthService>>,
    identity: Identity,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(auth.get_profile(&identity).await?))
}

pub async fn update_profile(
    State(auth): State<Arc<AuthService>>,
    identity: Identity,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(auth.update_profile(&identity, req).await?))
}

pub async fn verify(identity: Identity) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user_id: identity.user_id,
        email: identity.email,
        department: identity.department,
        is_admin: identity.is_admin,
        auth_method: if identity.api_key_id.is_some() { "api_key" } else { "jwt" },
    })
}

pub async fn create_api_key(
    State(auth): State<Arc<AuthService>>,
    identity: Identity,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreatedApiKey>)> {
    Ok((StatusCode::CREATED, Json(auth.create_api_key(&identity, req).await?)))
}

pub async fn list_api_keys(
    State(auth): State<Arc<AuthService>>,
    identity: Identity,
) -> ApiResult<Json<Vec<ApiKeyInfo>>> {
    Ok(Json(auth.list_api_keys(&identity).await?))
}

/// Also mounted under `/admin`, where any key may be revoked.
pub async fn revoke_api_key(
    State(auth): State<Arc<AuthService>>,
    identity: Identity,
    Path(key_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    auth.revoke_api_key(&identity, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
