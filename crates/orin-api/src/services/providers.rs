//! Seams to the external collaborators: embedding API, managed vector
//! index and chat-completion API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::error::UpstreamError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, UpstreamError>;
}

/// Embed a single text through a batch provider.
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, UpstreamError> {
    provider
        .embed_batch(vec![text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::InvalidResponse {
            service: "embeddings",
            detail: "empty embedding batch".into(),
        })
}

/// Metadata stored alongside every chunk vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub department: String,
    pub document_type: String,
    pub filename: String,
    #[serde(deserialize_with = "deserialize_index")]
    pub chunk_index: u32,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub uploaded_by: String,
}

/// Index metadata stores every number as a float.
fn deserialize_index<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!("invalid chunk index {value}")));
    }
    Ok(value as u32)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub namespace: String,
    pub vector: Vec<f32>,
    pub top_k: usize,
    /// Equality filter on `document_type` metadata.
    pub document_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<ChunkMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IndexStats {
    pub dimension: Option<usize>,
    pub total_vector_count: u64,
    pub namespaces: HashMap<String, u64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns the number of vectors the index accepted.
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>)
        -> Result<usize, UpstreamError>;

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, UpstreamError>;

    async fn delete(&self, namespace: &str, ids: Vec<String>) -> Result<(), UpstreamError>;

    async fn stats(&self) -> Result<IndexStats, UpstreamError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, UpstreamError>;
}
