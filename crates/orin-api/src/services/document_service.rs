//! Upload pipeline (validate, parse, chunk, embed, index, persist) and
//! document removal.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::config::settings::UploadConfig;
use crate::document::{DocumentKind, DocumentParser, TextChunker};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::document::{normalize_tags, vector_id};
use crate::models::user::normalize_department;
use crate::models::{Document, DocumentFilter, DocumentStats};
use crate::repositories::{is_duplicate, DocumentRepository};
use crate::security::DepartmentAuthorization;
use crate::services::providers::{ChunkMetadata, EmbeddingProvider, VectorIndex, VectorRecord};
use crate::utils::error::{ApiError, ApiResult, UpstreamError};

pub const DEFAULT_DEPARTMENT: &str = "general";
pub const DEFAULT_DOCUMENT_TYPE: &str = "policy";
const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;
const RECENT_UPLOADS: i64 = 10;

/// One uploaded file as received from a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub department: Option<String>,
    pub document_type: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl UploadMetadata {
    fn department(&self) -> String {
        self.department
            .as_deref()
            .map(normalize_department)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string())
    }

    fn document_type(&self) -> String {
        self.document_type
            .as_deref()
            .map(normalize_department)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_DOCUMENT_TYPE.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Indexed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
    pub chunks_indexed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchUploadResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<FileResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub document_id: Uuid,
    pub deleted: bool,
    pub vectors_deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct DocumentService {
    documents: Arc<dyn DocumentRepository>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    authorization: Arc<DepartmentAuthorization>,
    chunker: TextChunker,
    upload: UploadConfig,
    activity: ActivityLogger,
}

impl DocumentService {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        authorization: Arc<DepartmentAuthorization>,
        chunker: TextChunker,
        upload: UploadConfig,
        activity: ActivityLogger,
    ) -> Self {
        Self {
            documents,
            embedder,
            index,
            authorization,
            chunker,
            upload,
            activity,
        }
    }

    pub fn max_files_per_batch(&self) -> usize {
        self.upload.max_files_per_batch
    }

    /// Cheap checks that must pass before any external service is touched.
    fn validate_file(&self, file: &UploadedFile) -> ApiResult<DocumentKind> {
        let kind = DocumentKind::from_filename(&file.filename).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unsupported file type '{}'. Allowed: .pdf, .txt, .doc, .docx",
                file.filename
            ))
        })?;

        if !kind.accepts_declared_mime(file.content_type.as_deref()) {
            return Err(ApiError::BadRequest(format!(
                "Content type '{}' is not allowed for '{}'",
                file.content_type.as_deref().unwrap_or_default(),
                file.filename
            )));
        }
        if file.data.is_empty() {
            return Err(ApiError::BadRequest(format!("'{}' is empty", file.filename)));
        }
        if file.data.len() > self.upload.max_file_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "'{}' is {} bytes; the limit is {} bytes",
                file.filename,
                file.data.len(),
                self.upload.max_file_size
            )));
        }
        Ok(kind)
    }

    /// Ingest one file. The document record exists only if every vector
    /// batch was accepted by the index.
    pub async fn ingest(
        &self,
        identity: &Identity,
        file: UploadedFile,
        metadata: &UploadMetadata,
    ) -> ApiResult<Document> {
        let started = Instant::now();
        let filename = file.filename.clone();

        let result = self.ingest_file(identity, file, metadata).await;
        let elapsed = started.elapsed().as_millis();

        match &result {
            Ok(doc) => {
                info!(
                    "Indexed '{}' as {} into '{}' ({} chunks, {}ms)",
                    doc.filename, doc.id, doc.department, doc.chunk_count, elapsed
                );
                self.activity.log(
                    ActivityLog::builder(ActivityType::DocumentUploaded)
                        .actor(identity.user_id, &identity.email)
                        .target(doc.id)
                        .detail(format!("{} -> {}", doc.filename, doc.department))
                        .duration_ms(elapsed)
                        .build(),
                );
            }
            Err(e) => {
                warn!("Upload of '{}' failed: {}", filename, e);
                self.activity.log(
                    ActivityLog::builder(ActivityType::DocumentUploadFailed)
                        .actor(identity.user_id, &identity.email)
                        .status(ActivityStatus::Error)
                        .detail(&filename)
                        .duration_ms(elapsed)
                        .error(e.to_string())
                        .build(),
                );
            }
        }
        result
    }

    async fn ingest_file(
        &self,
        identity: &Identity,
        file: UploadedFile,
        metadata: &UploadMetadata,
    ) -> ApiResult<Document> {
        let kind = self.validate_file(&file)?;
        let department = metadata.department();
        let document_type = metadata.document_type();
        self.authorization.require_upload_to(identity, &department)?;

        let content_hash = hex::encode(Sha256::digest(&file.data));
        if let Some(existing) = self.documents.find_by_hash(&department, &content_hash).await? {
            return Err(ApiError::Conflict(format!(
                "'{}' is already indexed in '{}' as document {}",
                file.filename, department, existing.id
            )));
        }

        let bytes = file.data.clone();
        let parsed = tokio::task::spawn_blocking(move || DocumentParser::parse(kind, &bytes))
            .await
            .map_err(|e| ApiError::InternalError(format!("Parser task failed: {e}")))?
            .map_err(|e| ApiError::BadRequest(format!("Could not read '{}': {e:#}", file.filename)))?;
        debug!(
            "Extracted {} chars from '{}' ({})",
            parsed.metadata.char_count, file.filename, parsed.metadata.encoding
        );

        let chunks = self.chunker.chunk(&parsed.content);
        if chunks.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No text content found in '{}'",
                file.filename
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(UpstreamError::InvalidResponse {
                service: "embeddings",
                detail: format!("expected {} vectors, got {}", chunks.len(), embeddings.len()),
            }
            .into());
        }

        let document_id = Uuid::new_v4();
        let tags = normalize_tags(&metadata.tags);
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, values)| VectorRecord {
                id: vector_id(document_id, chunk.index),
                values,
                metadata: ChunkMetadata {
                    document_id: document_id.to_string(),
                    department: department.clone(),
                    document_type: document_type.clone(),
                    filename: file.filename.clone(),
                    chunk_index: chunk.index as u32,
                    text: chunk.content,
                    tags: tags.clone(),
                    uploaded_by: identity.user_id.to_string(),
                },
            })
            .collect();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let chunk_count = records.len();

        let upserted = match self.index.upsert(&department, records).await {
            Ok(accepted) if accepted != chunk_count => Err(UpstreamError::InvalidResponse {
                service: "vector index",
                detail: format!("acknowledged {accepted} of {chunk_count} vectors"),
            }),
            other => other.map(|_| ()),
        };
        if let Err(e) = upserted {
            warn!("Indexing {} failed: {}", document_id, e);
            self.discard_vectors(&department, ids).await;
            return Err(e.into());
        }

        let storage_path = self.storage_path(document_id, kind);
        if let Err(e) = self.store_file(&storage_path, &file.data).await {
            self.discard_vectors(&department, ids).await;
            return Err(e);
        }

        let doc = Document {
            id: document_id,
            filename: file.filename,
            department: department.clone(),
            document_type,
            description: metadata.description.clone().filter(|d| !d.trim().is_empty()),
            tags,
            uploaded_by: identity.user_id,
            uploader_email: identity.email.clone(),
            uploaded_at: Utc::now(),
            size_bytes: file.data.len() as i64,
            mime_type: kind.mime_type().to_string(),
            content_hash,
            storage_location: storage_path.to_string_lossy().to_string(),
            chunk_count: chunk_count as i32,
        };

        if let Err(e) = self.documents.insert(&doc).await {
            self.discard_vectors(&department, ids).await;
            self.remove_file(&storage_path).await;
            if is_duplicate(&e) {
                return Err(ApiError::Conflict(format!(
                    "'{}' is already indexed in '{}'",
                    doc.filename, department
                )));
            }
            error!("Persisting document {} failed after indexing: {:#}", doc.id, e);
            return Err(ApiError::DatabaseError(e.to_string()));
        }

        Ok(doc)
    }

    /// Files in one batch are processed independently; a failure never
    /// aborts the rest.
    pub async fn ingest_batch(
        &self,
        identity: &Identity,
        files: Vec<UploadedFile>,
        metadata: &UploadMetadata,
    ) -> ApiResult<BatchUploadResult> {
        if files.is_empty() {
            return Err(ApiError::BadRequest("No files provided".into()));
        }
        if files.len() > self.upload.max_files_per_batch {
            return Err(ApiError::BadRequest(format!(
                "At most {} files per upload, got {}",
                self.upload.max_files_per_batch,
                files.len()
            )));
        }

        let total = files.len();
        let mut results = Vec::with_capacity(total);
        for file in files {
            let filename = file.filename.clone();
            results.push(match self.ingest(identity, file, metadata).await {
                Ok(doc) => FileResult {
                    filename,
                    status: FileStatus::Indexed,
                    document_id: Some(doc.id),
                    chunks_indexed: doc.chunk_count as usize,
                    error: None,
                },
                Err(e) => FileResult {
                    filename,
                    status: FileStatus::Failed,
                    document_id: None,
                    chunks_indexed: 0,
                    error: Some(e.to_string()),
                },
            });
        }

        let succeeded = results.iter().filter(|r| r.status == FileStatus::Indexed).count();
        info!("Batch upload by {}: {}/{} indexed", identity.email, succeeded, total);
        Ok(BatchUploadResult {
            total,
            succeeded,
            failed: total - succeeded,
            results,
        })
    }

    /// Vectors go first; if the index refuses, the record is kept so the
    /// delete can be retried.
    pub async fn delete(
        &self,
        actor: &Identity,
        document_id: Uuid,
        reason: Option<&str>,
    ) -> ApiResult<DeleteResult> {
        let doc = self
            .documents
            .find_by_id(document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Document {document_id} not found")))?;

        let ids = doc.vector_ids();
        let vectors = ids.len();
        self.index.delete(&doc.department, ids).await?;

        self.documents.delete(doc.id).await?;
        self.remove_file(&PathBuf::from(&doc.storage_location)).await;

        info!(
            "Document {} ('{}') deleted by {} ({} vectors)",
            doc.id, doc.filename, actor.email, vectors
        );
        let mut entry = ActivityLog::builder(ActivityType::DocumentDeleted)
            .actor(actor.user_id, &actor.email)
            .target(doc.id);
        if let Some(reason) = reason {
            entry = entry.detail(reason);
        }
        self.activity.log(entry.build());

        Ok(DeleteResult {
            document_id: doc.id,
            deleted: true,
            vectors_deleted: vectors,
            error: None,
        })
    }

    pub async fn delete_many(
        &self,
        actor: &Identity,
        document_ids: &[Uuid],
        reason: Option<&str>,
    ) -> Vec<DeleteResult> {
        let mut results = Vec::with_capacity(document_ids.len());
        for &id in document_ids {
            results.push(match self.delete(actor, id, reason).await {
                Ok(result) => result,
                Err(e) => DeleteResult {
                    document_id: id,
                    deleted: false,
                    vectors_deleted: 0,
                    error: Some(e.to_string()),
                },
            });
        }
        results
    }

    /// Metadata listing, narrowed to the caller's departments.
    pub async fn list(&self, identity: &Identity, mut filter: DocumentFilter) -> ApiResult<Vec<Document>> {
        let requested: Option<Vec<String>> = filter
            .departments
            .take()
            .map(|ds| ds.iter().map(|d| normalize_department(d)).collect());

        filter.departments = if identity.is_admin {
            requested
        } else {
            let reachable = self.authorization.accessible_departments(identity).await?;
            Some(match requested {
                Some(requested) => requested.into_iter().filter(|d| reachable.contains(d)).collect(),
                None => reachable,
            })
        };
        self.list_unscoped(filter).await
    }

    async fn list_unscoped(&self, mut filter: DocumentFilter) -> ApiResult<Vec<Document>> {
        filter.limit = if filter.limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            filter.limit.min(MAX_LIST_LIMIT)
        };
        filter.offset = filter.offset.max(0);
        filter.tags = normalize_tags(&filter.tags);
        filter.document_type = filter.document_type.as_deref().map(normalize_department);
        Ok(self.documents.list(&filter).await?)
    }

    /// Documents outside the caller's reach are reported as missing.
    pub async fn get(&self, identity: &Identity, document_id: Uuid) -> ApiResult<Document> {
        self.documents
            .find_by_id(document_id)
            .await?
            .filter(|doc| self.authorization.can_view(identity, doc))
            .ok_or_else(|| ApiError::NotFound(format!("Document {document_id} not found")))
    }

    pub async fn stats(&self) -> ApiResult<DocumentStats> {
        Ok(self.documents.stats(RECENT_UPLOADS).await?)
    }

    fn storage_path(&self, document_id: Uuid, kind: DocumentKind) -> PathBuf {
        PathBuf::from(&self.upload.upload_dir).join(format!("{document_id}.{}", kind.extension()))
    }

    async fn store_file(&self, path: &PathBuf, data: &[u8]) -> ApiResult<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ApiError::InternalError(format!("Cannot create upload dir: {e}")))?;
        }
        tokio::fs::write(path, data)
            .await
            .map_err(|e| ApiError::InternalError(format!("Cannot store upload: {e}")))
    }

    async fn remove_file(&self, path: &PathBuf) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove stored file {}: {}", path.display(), e);
            }
        }
    }

    /// Best-effort removal of vectors written for a failed ingestion.
    async fn discard_vectors(&self, namespace: &str, ids: Vec<String>) {
        let count = ids.len();
        match self.index.delete(namespace, ids).await {
            Ok(()) => debug!("Discarded {} vectors from '{}'", count, namespace),
            Err(e) => error!(
                "Could not discard {} vectors from '{}' after a failed upload: {}",
                count, namespace, e
            ),
        }
    }
}
