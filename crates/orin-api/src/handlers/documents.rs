use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::handlers::multipart::read_upload_form;
use crate::models::{Document, DocumentFilter};
use crate::services::rag_service::{SearchOptions, SearchResponse};
use crate::services::{DocumentService, RagService};
use crate::utils::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub document: Document,
    pub chunks_indexed: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub department: Option<String>,
    pub document_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub department: Option<String>,
    pub document_type: Option<String>,
    /// Comma separated.
    pub tags: Option<String>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct DocumentList {
    pub total: usize,
    pub documents: Vec<Document>,
}

pub async fn upload_handler(
    State(documents): State<Arc<DocumentService>>,
    identity: Identity,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut form = read_upload_form(multipart, &["file"]).await?;
    if form.files.len() > 1 {
        return Err(ApiError::BadRequest(
            "Upload one file per request; use the admin bulk upload for batches".into(),
        ));
    }
    let Some(file) = form.files.pop() else {
        return Err(ApiError::BadRequest("Missing file field (file)".into()));
    };

    let document = documents.ingest(&identity, file, &form.metadata).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            chunks_indexed: document.chunk_count as usize,
            document,
        }),
    ))
}

pub async fn search_handler(
    State(rag): State<Arc<RagService>>,
    identity: Identity,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let options = SearchOptions {
        department: params.department,
        document_type: params.document_type,
        limit: params.limit,
        ..Default::default()
    };
    Ok(Json(rag.search(&identity, &params.query, &options).await?))
}

pub async fn list_handler(
    State(documents): State<Arc<DocumentService>>,
    identity: Identity,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<DocumentList>> {
    let filter = DocumentFilter {
        departments: params.department.map(|d| vec![d]),
        document_type: params.document_type,
        tags: params
            .tags
            .map(|t| t.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
        limit: params.limit,
        offset: params.offset,
        ..Default::default()
    };
    let documents = documents.list(&identity, filter).await?;
    Ok(Json(DocumentList {
        total: documents.len(),
        documents,
    }))
}

pub async fn get_handler(
    State(documents): State<Arc<DocumentService>>,
    identity: Identity,
    Path(document_id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    Ok(Json(documents.get(&identity, document_id).await?))
}
