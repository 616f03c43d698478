use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use super::models::{ApiKeyRow, ChatRow, CountRow, DocumentRow, UserRow};
use super::DbPool;
use crate::logging::{ActivityLog, ActivitySink};
use crate::models::document::{CountBy, RecentUpload};
use crate::models::{ApiKey, ChatRecord, Document, DocumentFilter, DocumentStats, User};
use crate::repositories::{
    ApiKeyRepository, ChatRepository, DocumentRepository, DuplicateKey, UserRepository,
};

const USER_COLUMNS: &str =
    "id, email, password_hash, full_name, department, role, is_active, created_at, updated_at";

const API_KEY_COLUMNS: &str = "id, user_id, name, key_prefix, key_hash, created_at, expires_at, \
     revoked, revoked_at, last_used_at";

const DOCUMENT_COLUMNS: &str = "id, filename, department, document_type, description, tags, \
     uploaded_by, uploader_email, uploaded_at, size_bytes, mime_type, content_hash, \
     storage_location, chunk_count";

const CHAT_COLUMNS: &str =
    "id, user_id, api_key_id, department, question, answer, source_document_ids, created_at";

/// Postgres implementation of every storage port.
#[derive(Clone)]
pub struct PgStore {
    pub pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn count_by(&self, column: &str) -> Result<Vec<CountBy>> {
        // column comes from a fixed set below, never from input
        let sql = format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM documents \
             GROUP BY {column} ORDER BY count DESC, key"
        );
        let rows = sqlx::query_as::<_, CountRow>(&sql)
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| CountBy {
                key: r.key,
                count: r.count,
            })
            .collect())
    }
}

fn map_unique_violation(err: sqlx::Error, what: &str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return DuplicateKey(what.to_string()).into();
        }
    }
    err.into()
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(self.pool.get_pool())
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users
               (id, email, password_hash, full_name, department, role, is_active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(&user.department)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| map_unique_violation(e, &user.email))?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"UPDATE users
               SET password_hash = $2, full_name = $3, department = $4, role = $5,
                   is_active = $6, updated_at = $7
               WHERE id = $1"#,
        )
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(&user.department)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.updated_at)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(self.pool.get_pool())
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }
}

#[async_trait]
impl ApiKeyRepository for PgStore {
    async fn create(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO api_keys
               (id, user_id, name, key_prefix, key_hash, created_at, expires_at, revoked)
               VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)"#,
        )
        .bind(key.id)
        .bind(key.user_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(key.created_at)
        .bind(key.expires_at)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row.map(ApiKey::from))
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row.map(ApiKey::from))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE api_keys SET revoked = TRUE, revoked_at = $2 WHERE id = $1 AND NOT revoked",
        )
        .bind(id)
        .bind(at)
        .execute(self.pool.get_pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for PgStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO documents
               (id, filename, department, document_type, description, tags, uploaded_by,
                uploader_email, uploaded_at, size_bytes, mime_type, content_hash,
                storage_location, chunk_count)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(doc.id)
        .bind(&doc.filename)
        .bind(&doc.department)
        .bind(&doc.document_type)
        .bind(&doc.description)
        .bind(&doc.tags)
        .bind(doc.uploaded_by)
        .bind(&doc.uploader_email)
        .bind(doc.uploaded_at)
        .bind(doc.size_bytes)
        .bind(&doc.mime_type)
        .bind(&doc.content_hash)
        .bind(&doc.storage_location)
        .bind(doc.chunk_count)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| map_unique_violation(e, &doc.content_hash))?;

        debug!("Inserted document {} ({})", doc.id, doc.filename);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row.map(Document::from))
    }

    async fn find_by_hash(&self, department: &str, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE department = $1 AND content_hash = $2"
        ))
        .bind(department)
        .bind(content_hash)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row.map(Document::from))
    }

    async fn existing_ids(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query_scalar::<_, Uuid>("SELECT id FROM documents WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE TRUE"
        ));

        if let Some(departments) = &filter.departments {
            qb.push(" AND department = ANY(").push_bind(departments.clone()).push(")");
        }
        if let Some(document_type) = &filter.document_type {
            qb.push(" AND document_type = ").push_bind(document_type.clone());
        }
        if let Some(uploaded_by) = filter.uploaded_by {
            qb.push(" AND uploaded_by = ").push_bind(uploaded_by);
        }
        if !filter.tags.is_empty() {
            qb.push(" AND tags && ").push_bind(filter.tags.clone());
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND uploaded_at >= ").push_bind(from);
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND uploaded_at <= ").push_bind(to);
        }
        qb.push(" ORDER BY uploaded_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb
            .build_query_as::<DocumentRow>()
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(rows.into_iter().map(Document::from).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn departments(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT department FROM documents ORDER BY department",
        )
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    async fn stats(&self, recent_limit: i64) -> Result<DocumentStats> {
        let (total_documents, total_chunks, storage_bytes): (i64, i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(chunk_count), 0)::BIGINT,
                      COALESCE(SUM(size_bytes), 0)::BIGINT
               FROM documents"#,
        )
        .fetch_one(self.pool.get_pool())
        .await?;

        let recent = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY uploaded_at DESC LIMIT $1"
        ))
        .bind(recent_limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(DocumentStats {
            total_documents,
            total_chunks,
            storage_bytes,
            by_department: self.count_by("department").await?,
            by_type: self.count_by("document_type").await?,
            by_uploader: self.count_by("uploader_email").await?,
            recent_uploads: recent
                .into_iter()
                .map(|row| RecentUpload::from(&Document::from(row)))
                .collect(),
            last_updated: Utc::now(),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.pool.get_pool()).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatRepository for PgStore {
    async fn insert(&self, record: &ChatRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO chat_records
               (id, user_id, api_key_id, department, question, answer, source_document_ids, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.api_key_id)
        .bind(&record.department)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(&record.source_document_ids)
        .bind(record.created_at)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    async fn recent_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chat_records WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows.into_iter().map(ChatRecord::from).collect())
    }
}

#[async_trait]
impl ActivitySink for PgStore {
    async fn insert_batch(&self, logs: &[ActivityLog]) -> Result<usize> {
        if logs.is_empty() {
            return Ok(0);
        }

        let mut query_builder = QueryBuilder::<Postgres>::new(
            r#"
            INSERT INTO activity_logs (
                actor_id, actor_email, activity_type, activity_status,
                target_id, detail, error_message, duration_ms, created_at
            )
            "#,
        );

        query_builder.push_values(logs, |mut b, log| {
            b.push_bind(log.actor_id)
                .push_bind(&log.actor_email)
                .push_bind(log.activity_type.as_str())
                .push_bind(log.activity_status.as_str())
                .push_bind(log.target_id)
                .push_bind(&log.detail)
                .push_bind(&log.error_message)
                .push_bind(log.duration_ms)
                .push_bind(log.created_at);
        });

        let result = query_builder.build().execute(self.pool.get_pool()).await?;
        Ok(result.rows_affected() as usize)
    }
}
