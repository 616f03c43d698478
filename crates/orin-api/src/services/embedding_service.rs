use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::settings::OpenAiConfig;
use crate::services::providers::EmbeddingProvider;
use crate::utils::error::UpstreamError;

const SERVICE: &str = "embeddings";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .context("Failed to build embedding HTTP client")?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            batch_size: config.embedding_batch_size.max(1),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        debug!("Requesting {} embeddings from {}", texts.len(), self.model);

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.dimension,
            })
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(SERVICE, status.as_u16(), body));
        }

        let mut parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| UpstreamError::InvalidResponse {
                    service: SERVICE,
                    detail: e.to_string(),
                })?;

        if parsed.data.len() != texts.len() {
            return Err(UpstreamError::InvalidResponse {
                service: SERVICE,
                detail: format!("expected {} embeddings, got {}", texts.len(), parsed.data.len()),
            });
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_request(batch).await?);
        }
        Ok(out)
    }
}
