use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::auth::Identity;
use crate::services::PortalClient;
use crate::state::AppState;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct PortalData {
    data_type: String,
    data: Value,
}

/// The caller's own record from the internal portal.
pub async fn user_data(
    State(state): State<AppState>,
    identity: Identity,
    Path(data_type): Path<String>,
) -> ApiResult<Json<PortalData>> {
    let portal = state
        .portal
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Portal integration is not configured".into()))?;

    if !PortalClient::is_valid_data_type(&data_type) {
        return Err(ApiError::BadRequest(format!("Invalid data type '{data_type}'")));
    }

    info!("Portal lookup '{}' for {}", data_type, identity.email);
    let data = portal
        .fetch_user_data(identity.user_id, &data_type)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No '{data_type}' data for this user")))?;

    Ok(Json(PortalData { data_type, data }))
}
