//! Row types and their conversion into domain entities.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{ApiKey, ChatRecord, Document, Role, User};

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub department: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            role: row.role.parse::<Role>().map_err(|e| anyhow!(e))?,
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            full_name: row.full_name,
            department: row.department,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked: row.revoked,
            revoked_at: row.revoked_at,
            last_used_at: row.last_used_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub filename: String,
    pub department: String,
    pub document_type: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub uploaded_by: Uuid,
    pub uploader_email: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub mime_type: String,
    pub content_hash: String,
    pub storage_location: String,
    pub chunk_count: i32,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            filename: row.filename,
            department: row.department,
            document_type: row.document_type,
            description: row.description,
            tags: row.tags,
            uploaded_by: row.uploaded_by,
            uploader_email: row.uploader_email,
            uploaded_at: row.uploaded_at,
            size_bytes: row.size_bytes,
            mime_type: row.mime_type,
            content_hash: row.content_hash,
            storage_location: row.storage_location,
            chunk_count: row.chunk_count,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub department: Option<String>,
    pub question: String,
    pub answer: String,
    pub source_document_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<ChatRow> for ChatRecord {
    fn from(row: ChatRow) -> Self {
        ChatRecord {
            id: row.id,
            user_id: row.user_id,
            api_key_id: row.api_key_id,
            department: row.department,
            question: row.question,
            answer: row.answer,
            source_document_ids: row.source_document_ids,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CountRow {
    pub key: String,
    pub count: i64,
}
