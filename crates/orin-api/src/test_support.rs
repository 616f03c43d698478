//! Deterministic fakes for the external collaborators and a ready-wired
//! application state for router tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Settings;
use crate::logging::ActivityLogger;
use crate::models::auth::{LoginRequest, RegisterRequest};
use crate::repositories::memory::MemoryStore;
use crate::services::providers::{
    ChatMessage, EmbeddingProvider, IndexStats, LlmProvider, VectorIndex, VectorMatch,
    VectorQuery, VectorRecord,
};
use crate::state::{AppState, Backends};
use crate::utils::error::UpstreamError;

/// Hashed bag-of-words embedding: texts sharing words score higher.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub const DIMENSION: usize = 512;

    pub fn vector(text: &str) -> Vec<f32> {
        let mut values = vec![0.0; Self::DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in word.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            values[(hash % Self::DIMENSION as u64) as usize] += 1.0;
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, UpstreamError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailingStep {
    Upsert,
    Query,
    Delete,
}

/// Namespaced in-memory index with cosine scoring and injectable outages.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
    failing: RwLock<Option<FailingStep>>,
    upserts: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, step: FailingStep) {
        *self.failing.write() = Some(step);
    }

    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.namespaces.read().get(namespace).map_or(0, HashMap::len)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn check(&self, step: FailingStep) -> Result<(), UpstreamError> {
        if *self.failing.read() == Some(step) {
            return Err(UpstreamError::Unavailable {
                service: "vector index",
                detail: format!("injected {step:?} failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<usize, UpstreamError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check(FailingStep::Upsert)?;
        let count = records.len();
        let mut namespaces = self.namespaces.write();
        let entries = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            entries.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<VectorMatch>, UpstreamError> {
        self.check(FailingStep::Query)?;
        let namespaces = self.namespaces.read();
        let Some(entries) = namespaces.get(&query.namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = entries
            .values()
            .filter(|r| {
                query
                    .document_type
                    .as_ref()
                    .is_none_or(|t| &r.metadata.document_type == t)
            })
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(&query.vector, &r.values),
                metadata: Some(r.metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn delete(&self, namespace: &str, ids: Vec<String>) -> Result<(), UpstreamError> {
        self.check(FailingStep::Delete)?;
        if let Some(entries) = self.namespaces.write().get_mut(namespace) {
            for id in &ids {
                entries.remove(id);
            }
        }
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, UpstreamError> {
        let namespaces: HashMap<String, u64> = self
            .namespaces
            .read()
            .iter()
            .map(|(ns, entries)| (ns.clone(), entries.len() as u64))
            .collect();
        Ok(IndexStats {
            dimension: Some(KeywordEmbedder::DIMENSION),
            total_vector_count: namespaces.values().sum(),
            namespaces,
        })
    }
}

/// Answers with the question it was asked.
pub struct EchoLlm;

#[async_trait]
impl LlmProvider for EchoLlm {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, UpstreamError> {
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("From the documents: {question}"))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub index: Arc<InMemoryVectorIndex>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let backends = Backends {
            users: store.clone(),
            api_keys: store.clone(),
            documents: store.clone(),
            chats: store.clone(),
            embedder: Arc::new(KeywordEmbedder),
            vector_index: index.clone(),
            llm: Arc::new(EchoLlm),
        };
        let state = AppState::new(Settings::for_tests(), backends, ActivityLogger::disabled(), None)
            .expect("test state");
        Self { state, store, index }
    }

    /// Register (if needed) and log in; returns a bearer token.
    pub async fn token_for(&self, email: &str, department: &str) -> String {
        let auth = &self.state.auth_service;
        let _ = auth
            .register(RegisterRequest {
                email: email.into(),
                password: "password123".into(),
                full_name: None,
                department: Some(department.into()),
            })
            .await;
        auth.login(LoginRequest {
            email: email.into(),
            password: "password123".into(),
        })
        .await
        .expect("login")
        .access_token
    }
}

/// Encode a `multipart/form-data` body. Returns the content type header
/// value and the body bytes.
pub fn multipart_body(
    files: &[(&str, &str, &str, Vec<u8>)],
    fields: &[(&str, &str)],
) -> (String, Vec<u8>) {
    const BOUNDARY: &str = "orin-test-boundary";
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, filename, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}
