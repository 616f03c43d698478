//! Pinecone REST client (data plane plus index resolution on the control
//! plane).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::settings::PineconeConfig;
use crate::services::providers::{IndexStats, VectorIndex, VectorMatch, VectorQuery, VectorRecord};
use crate::utils::error::UpstreamError;

const SERVICE: &str = "vector index";
const MAX_DELETE_IDS: usize = 1000;

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceSummary>,
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

#[derive(Deserialize)]
struct IndexDescription {
    host: String,
}

pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
    api_version: String,
    upsert_batch_size: usize,
    delete_batch_size: usize,
}

impl PineconeIndex {
    fn build_client(config: &PineconeConfig) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build Pinecone HTTP client")
    }

    /// Client for a known data-plane host.
    pub fn new(config: &PineconeConfig, host: &str) -> Result<Self> {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };

        Ok(Self {
            client: Self::build_client(config)?,
            host,
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            upsert_batch_size: config.upsert_batch_size.max(1),
            delete_batch_size: config.delete_batch_size.clamp(1, MAX_DELETE_IDS),
        })
    }

    /// Use the configured host, or look the index up on the control plane
    /// and create it (cosine, serverless) when it does not exist yet.
    pub async fn connect(config: &PineconeConfig, dimension: usize) -> Result<Self> {
        if !config.index_host.trim().is_empty() {
            return Self::new(config, &config.index_host);
        }

        let client = Self::build_client(config)?;
        let base = config.control_plane_url.trim_end_matches('/');
        let with_headers = |rb: RequestBuilder| {
            rb.header("Api-Key", &config.api_key)
                .header("X-Pinecone-API-Version", &config.api_version)
        };

        let response = with_headers(client.get(format!("{base}/indexes/{}", config.index_name)))
            .send()
            .await
            .context("Failed to reach Pinecone control plane")?;

        let description: IndexDescription = match response.status() {
            status if status.is_success() => response.json().await?,
            StatusCode::NOT_FOUND => {
                info!(
                    "Creating Pinecone index '{}' (dimension {}, {}/{})",
                    config.index_name, dimension, config.cloud, config.region
                );
                let created = with_headers(client.post(format!("{base}/indexes")))
                    .json(&json!({
                        "name": config.index_name,
                        "dimension": dimension,
                        "metric": "cosine",
                        "spec": {"serverless": {"cloud": config.cloud, "region": config.region}},
                    }))
                    .send()
                    .await
                    .context("Failed to create Pinecone index")?;
                if !created.status().is_success() {
                    let status = created.status();
                    let body = created.text().await.unwrap_or_default();
                    bail!("Pinecone index creation failed ({status}): {body}");
                }
                created.json().await?
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("Pinecone describe index failed ({status}): {body}");
            }
        };

        info!("Resolved Pinecone index host {}", description.host);
        Self::new(config, &description.host)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_transport(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(SERVICE, status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse {
                service: SERVICE,
                detail: e.to_string(),
            })
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<usize, UpstreamError> {
        let mut upserted = 0;
        for batch in records.chunks(self.upsert_batch_size) {
            let response: UpsertResponse = self
                .send(self.post("/vectors/upsert").json(&UpsertRequest {
                    vectors: batch,
                    namespace,
                }))
                .await?;
            upserted += response.upserted_count;
        }
        debug!("Upserted {} vectors into namespace '{}'", upserted, namespace);
        Ok(upserted)
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, UpstreamError> {
        let filter = query
            .document_type
            .as_ref()
            .map(|t| json!({"document_type": {"$eq": t}}));

        let response: QueryResponse = self
            .send(self.post("/query").json(&QueryRequest {
                namespace: &query.namespace,
                vector: &query.vector,
                top_k: query.top_k,
                include_metadata: true,
                include_values: false,
                filter,
            }))
            .await?;

        debug!(
            "Query in namespace '{}' returned {} matches",
            query.namespace,
            response.matches.len()
        );
        Ok(response.matches)
    }

    async fn delete(&self, namespace: &str, ids: Vec<String>) -> Result<(), UpstreamError> {
        for batch in ids.chunks(self.delete_batch_size) {
            // the delete endpoint answers with an empty JSON object
            let _: Value = self
                .send(self.post("/vectors/delete").json(&DeleteRequest {
                    ids: batch,
                    namespace,
                }))
                .await?;
        }
        debug!("Deleted {} vectors from namespace '{}'", ids.len(), namespace);
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, UpstreamError> {
        let response: StatsResponse = self
            .send(self.post("/describe_index_stats").json(&json!({})))
            .await?;

        Ok(IndexStats {
            dimension: response.dimension,
            total_vector_count: response.total_vector_count,
            namespaces: response
                .namespaces
                .into_iter()
                .map(|(name, summary)| (name, summary.vector_count))
                .collect(),
        })
    }
}
