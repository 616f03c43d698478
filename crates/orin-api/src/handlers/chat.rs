use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::Identity;
use crate::models::chat::{ChatRequest, ChatResponse};
use crate::models::ChatRecord;
use crate::services::RagService;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub total: usize,
    pub records: Vec<ChatRecord>,
}

pub async fn chat_handler(
    State(rag): State<Arc<RagService>>,
    identity: Identity,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    info!(
        "Chat request from {} (department filter: {:?})",
        identity.email,
        request.department_filter()
    );
    Ok(Json(rag.answer(&identity, request).await?))
}

/// Same as [`chat_handler`] but only for API-key callers (integrations).
pub async fn chat_api_key_handler(
    State(rag): State<Arc<RagService>>,
    identity: Identity,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let Some(key_id) = identity.api_key_id else {
        return Err(ApiError::Unauthorized(
            "This endpoint requires an API key".into(),
        ));
    };
    info!("Chat request via API key {} (owner {})", key_id, identity.email);
    Ok(Json(rag.answer(&identity, request).await?))
}

pub async fn history_handler(
    State(rag): State<Arc<RagService>>,
    identity: Identity,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let records = rag.history(&identity, query.limit).await?;
    Ok(Json(HistoryResponse {
        total: records.len(),
        records,
    }))
}
