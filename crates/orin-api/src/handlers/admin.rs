use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::Identity;
use crate::handlers::multipart::read_upload_form;
use crate::models::auth::{AdminCreateUserRequest, AdminUpdateUserRequest};
use crate::models::user::UserProfile;
use crate::models::{Document, DocumentFilter, DocumentStats};
use crate::services::document_service::{BatchUploadResult, DeleteResult};
use crate::services::providers::IndexStats;
use crate::services::rag_service::{SearchOptions, SearchResponse};
use crate::state::AppState;
use crate::utils::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct IndexHealth {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<IndexStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub admin: UserProfile,
    pub documents: DocumentStats,
    pub vector_index: IndexHealth,
    pub users: usize,
    pub departments: Vec<String>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminSearchRequest {
    pub query: Option<String>,
    pub department: Option<String>,
    pub document_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub uploaded_by: Option<Uuid>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 200))]
    pub limit: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub offset: i64,
}

/// Vector search when a query is given, metadata listing otherwise.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AdminSearchResponse {
    Vector(SearchResponse),
    Metadata { total: usize, documents: Vec<Document> },
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub document_ids: Vec<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteResponse {
    pub requested: usize,
    pub deleted: usize,
    pub failed: usize,
    pub results: Vec<DeleteResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteReason {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserList {
    pub total: usize,
    pub users: Vec<UserProfile>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    identity: Identity,
) -> ApiResult<Json<DashboardResponse>> {
    let admin = state.auth_service.get_profile(&identity).await?;
    let documents = state.document_service.stats().await?;
    let departments = state.authorization.accessible_departments(&identity).await?;
    let users = state.auth_service.admin_list_users().await?.len();

    let vector_index = match state.vector_index.stats().await {
        Ok(stats) => IndexHealth {
            available: true,
            stats: Some(stats),
            error: None,
        },
        Err(e) => IndexHealth {
            available: false,
            stats: None,
            error: Some(e.to_string()),
        },
    };

    Ok(Json(DashboardResponse {
        admin,
        documents,
        vector_index,
        users,
        departments,
    }))
}

pub async fn document_stats(State(state): State<AppState>) -> ApiResult<Json<DocumentStats>> {
    Ok(Json(state.document_service.stats().await?))
}

pub async fn bulk_upload(
    State(state): State<AppState>,
    identity: Identity,
    multipart: Multipart,
) -> ApiResult<Json<BatchUploadResult>> {
    let form = read_upload_form(multipart, &["files", "file"]).await?;
    Ok(Json(
        state
            .document_service
            .ingest_batch(&identity, form.files, &form.metadata)
            .await?,
    ))
}

pub async fn search_documents(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<AdminSearchRequest>,
) -> ApiResult<Json<AdminSearchResponse>> {
    req.validate()?;

    if let Some(query) = req.query.as_deref().filter(|q| !q.trim().is_empty()) {
        let options = SearchOptions {
            department: req.department.clone(),
            document_type: req.document_type.clone(),
            tags: req.tags.clone(),
            uploaded_by: req.uploaded_by,
            limit: Some(req.limit as usize),
        };
        let response = state.rag_service.search(&identity, query, &options).await?;
        return Ok(Json(AdminSearchResponse::Vector(response)));
    }

    let filter = DocumentFilter {
        departments: req.department.map(|d| vec![d]),
        document_type: req.document_type,
        uploaded_by: req.uploaded_by,
        tags: req.tags,
        date_from: req.date_from,
        date_to: req.date_to,
        limit: req.limit,
        offset: req.offset,
    };
    let documents = state.document_service.list(&identity, filter).await?;
    Ok(Json(AdminSearchResponse::Metadata {
        total: documents.len(),
        documents,
    }))
}

pub async fn delete_documents(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<BulkDeleteRequest>,
) -> ApiResult<Json<BulkDeleteResponse>> {
    if req.document_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "document_ids must not be empty".into(),
        ));
    }
    let results = state
        .document_service
        .delete_many(&identity, &req.document_ids, req.reason.as_deref())
        .await;
    let deleted = results.iter().filter(|r| r.deleted).count();

    Ok(Json(BulkDeleteResponse {
        requested: results.len(),
        deleted,
        failed: results.len() - deleted,
        results,
    }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
    body: Option<Json<DeleteReason>>,
) -> ApiResult<Json<DeleteResult>> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(
        state
            .document_service
            .delete(&identity, document_id, reason.as_deref())
            .await?,
    ))
}

pub async fn create_user(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<AdminCreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    let profile = state.auth_service.admin_create_user(&identity, req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UserList>> {
    let users = state.auth_service.admin_list_users().await?;
    Ok(Json(UserList {
        total: users.len(),
        users,
    }))
}

pub async fn update_user(
    State(state): State<AppState>,
    identity: Identity,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(
        state
            .auth_service
            .admin_update_user(&identity, user_id, req)
            .await?,
    ))
}
