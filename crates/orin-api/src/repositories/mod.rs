//! Storage ports. `database::PgStore` implements all of them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{ApiKey, ChatRecord, Document, DocumentFilter, DocumentStats, User};

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Fails with a unique-violation when the email is taken.
    async fn create(&self, user: &User) -> Result<()>;
    async fn update(&self, user: &User) -> Result<()>;
    async fn list(&self) -> Result<Vec<User>>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn create(&self, key: &ApiKey) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>>;
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>>;
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>>;
    /// Returns false when the key does not exist or was already revoked.
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert(&self, doc: &Document) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>>;
    async fn find_by_hash(&self, department: &str, content_hash: &str) -> Result<Option<Document>>;
    /// Subset of `ids` that still has a record.
    async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>>;
    async fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
    /// Every department that has at least one document.
    async fn departments(&self) -> Result<Vec<String>>;
    async fn stats(&self, recent_limit: i64) -> Result<DocumentStats>;
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn insert(&self, record: &ChatRecord) -> Result<()>;
    /// Most recent first.
    async fn recent_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<ChatRecord>>;
}

/// Marker a store returns (wrapped in `anyhow`) on a unique-key clash.
#[derive(Debug, thiserror::Error)]
#[error("duplicate key: {0}")]
pub struct DuplicateKey(pub String);

pub fn is_duplicate(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DuplicateKey>().is_some()
}
