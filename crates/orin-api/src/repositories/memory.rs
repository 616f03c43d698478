//! In-memory store for unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::{ApiKeyRepository, ChatRepository, DocumentRepository, DuplicateKey, UserRepository};
use crate::models::document::{CountBy, RecentUpload};
use crate::models::{ApiKey, ChatRecord, Document, DocumentFilter, DocumentStats, User};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    api_keys: RwLock<HashMap<Uuid, ApiKey>>,
    documents: RwLock<HashMap<Uuid, Document>>,
    chats: RwLock<Vec<ChatRecord>>,
    /// Makes document inserts fail, to exercise compensation paths.
    pub fail_document_insert: AtomicBool,
    /// Makes hash lookups miss, as when a concurrent upload commits between
    /// the lookup and the insert.
    pub stale_hash_lookup: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    pub fn chat_count(&self) -> usize {
        self.chats.read().len()
    }

    pub fn set_fail_document_insert(&self, fail: bool) {
        self.fail_document_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_stale_hash_lookup(&self, stale: bool) {
        self.stale_hash_lookup.store(stale, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.read().values().find(|u| u.email == email).cloned())
    }

    async fn create(&self, user: &User) -> Result<()> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email == user.email) {
            return Err(DuplicateKey(user.email.clone()).into());
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut users = self.users.write();
        if !users.contains_key(&user.id) {
            bail!("user {} not found", user.id);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryStore {
    async fn create(&self, key: &ApiKey) -> Result<()> {
        self.api_keys.write().insert(key.id, key.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>> {
        Ok(self.api_keys.read().get(&id).cloned())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .api_keys
            .read()
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        Ok(self
            .api_keys
            .read()
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut keys = self.api_keys.write();
        match keys.get_mut(&id) {
            Some(key) if !key.revoked => {
                key.revoked = true;
                key.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.api_keys.write().get_mut(&id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}

fn count_by<F: Fn(&Document) -> String>(docs: &[&Document], key: F) -> Vec<CountBy> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for doc in docs {
        *counts.entry(key(doc)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| CountBy { key, count })
        .collect()
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        if self.fail_document_insert.load(Ordering::SeqCst) {
            bail!("simulated insert failure");
        }
        let mut documents = self.documents.write();
        if documents
            .values()
            .any(|d| d.department == doc.department && d.content_hash == doc.content_hash)
        {
            return Err(DuplicateKey(doc.content_hash.clone()).into());
        }
        documents.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.documents.read().get(&id).cloned())
    }

    async fn find_by_hash(&self, department: &str, content_hash: &str) -> Result<Option<Document>> {
        if self.stale_hash_lookup.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .documents
            .read()
            .values()
            .find(|d| d.department == department && d.content_hash == content_hash)
            .cloned())
    }

    async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        let docs = self.documents.read();
        Ok(ids.iter().filter(|id| docs.contains_key(id)).copied().collect())
    }

    async fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(docs
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.documents.write().remove(&id).is_some())
    }

    async fn departments(&self) -> Result<Vec<String>> {
        let mut departments: Vec<String> = self
            .documents
            .read()
            .values()
            .map(|d| d.department.clone())
            .collect();
        departments.sort();
        departments.dedup();
        Ok(departments)
    }

    async fn stats(&self, recent_limit: i64) -> Result<DocumentStats> {
        let guard = self.documents.read();
        let mut docs: Vec<&Document> = guard.values().collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

        Ok(DocumentStats {
            total_documents: docs.len() as i64,
            total_chunks: docs.iter().map(|d| i64::from(d.chunk_count)).sum(),
            storage_bytes: docs.iter().map(|d| d.size_bytes).sum(),
            by_department: count_by(&docs, |d| d.department.clone()),
            by_type: count_by(&docs, |d| d.document_type.clone()),
            by_uploader: count_by(&docs, |d| d.uploader_email.clone()),
            recent_uploads: docs
                .iter()
                .take(recent_limit.max(0) as usize)
                .map(|d| RecentUpload::from(*d))
                .collect(),
            last_updated: Utc::now(),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn insert(&self, record: &ChatRecord) -> Result<()> {
        self.chats.write().push(record.clone());
        Ok(())
    }

    async fn recent_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<ChatRecord>> {
        let mut records: Vec<ChatRecord> = self
            .chats
            .read()
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}
