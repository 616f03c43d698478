//! Retrieval across department namespaces and grounded answer generation.

use chrono::Utc;
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::config::settings::RagConfig;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::user::normalize_department;
use crate::models::{ChatRecord, SourceRef};
use crate::models::chat::{ChatRequest, ChatResponse};
use crate::repositories::{ChatRepository, DocumentRepository};
use crate::security::DepartmentAuthorization;
use crate::services::providers::{
    embed_one, ChatMessage, ChunkMetadata, EmbeddingProvider, LlmProvider, VectorIndex,
    VectorQuery,
};
use crate::utils::error::{ApiError, ApiResult};
use crate::utils::limiters::Limiters;
use crate::utils::token_estimator::{estimate_tokens, truncate_to_tokens, would_exceed_limit};

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

/// A chunk that survived every retrieval filter.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub document_id: Uuid,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Narrowing applied to a retrieval on top of department scoping.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub department: Option<String>,
    pub document_type: Option<String>,
    /// Chunks carrying at least one of these tags.
    pub tags: Vec<String>,
    pub uploaded_by: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document_id: Uuid,
    pub filename: String,
    pub department: String,
    pub document_type: String,
    pub chunk_index: u32,
    pub score: f32,
    pub preview: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total: usize,
    pub results: Vec<SearchHit>,
}

pub struct RagService {
    documents: Arc<dyn DocumentRepository>,
    chats: Arc<dyn ChatRepository>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmProvider>,
    authorization: Arc<DepartmentAuthorization>,
    limiters: Limiters,
    config: RagConfig,
    activity: ActivityLogger,
}

impl RagService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        chats: Arc<dyn ChatRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmProvider>,
        authorization: Arc<DepartmentAuthorization>,
        limiters: Limiters,
        config: RagConfig,
        activity: ActivityLogger,
    ) -> Self {
        Self {
            documents,
            chats,
            embedder,
            index,
            llm,
            authorization,
            limiters,
            config,
            activity,
        }
    }

    /// Embed the query, search every namespace in scope and keep the best
    /// `top_k` chunks of documents that still exist.
    pub async fn retrieve(
        &self,
        identity: &Identity,
        query: &str,
        options: &SearchOptions,
        top_k: usize,
    ) -> ApiResult<Vec<RetrievedChunk>> {
        let scope = self
            .authorization
            .resolve_scope(identity, options.department.as_deref())
            .await?;
        if scope.is_empty() {
            debug!("{} has no departments with documents", identity.email);
            return Ok(Vec::new());
        }

        let vector = embed_one(self.embedder.as_ref(), query).await?;
        let document_type = options.document_type.as_deref().map(normalize_department);

        let per_namespace = try_join_all(scope.iter().map(|namespace| {
            self.index.query(VectorQuery {
                namespace: namespace.clone(),
                vector: vector.clone(),
                top_k,
                document_type: document_type.clone(),
            })
        }))
        .await?;

        let tags: Vec<String> = options.tags.iter().map(|t| t.trim().to_lowercase()).collect();
        let mut chunks: Vec<RetrievedChunk> = scope
            .iter()
            .zip(per_namespace)
            .flat_map(|(namespace, matches)| {
                matches.into_iter().filter_map(move |m| {
                    let metadata = m.metadata?;
                    // A chunk is only trusted inside the namespace it claims.
                    if &metadata.department != namespace {
                        warn!("Vector {} in '{}' claims department '{}'", m.id, namespace, metadata.department);
                        return None;
                    }
                    let document_id = Uuid::parse_str(&metadata.document_id).ok()?;
                    Some(RetrievedChunk {
                        document_id,
                        score: m.score,
                        metadata,
                    })
                })
            })
            .filter(|c| c.score >= self.config.min_score)
            .filter(|c| tags.is_empty() || c.metadata.tags.iter().any(|t| tags.contains(t)))
            .filter(|c| {
                options
                    .uploaded_by
                    .is_none_or(|u| c.metadata.uploaded_by == u.to_string())
            })
            .collect();

        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));

        let candidates: Vec<Uuid> = chunks
            .iter()
            .map(|c| c.document_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let existing = self.documents.existing_ids(&candidates).await?;
        let before = chunks.len();
        chunks.retain(|c| existing.contains(&c.document_id));
        if chunks.len() < before {
            debug!("Dropped {} chunks of deleted documents", before - chunks.len());
        }

        chunks.truncate(top_k);
        debug!(
            "Retrieved {} chunks across {} departments for {}",
            chunks.len(),
            scope.len(),
            identity.email
        );
        Ok(chunks)
    }

    /// Context block bounded by `max_context_tokens`. Returns the text and
    /// how many chunks made it in; the last one may be truncated.
    fn build_context(&self, chunks: &[RetrievedChunk]) -> (String, usize) {
        let budget = self.config.max_context_tokens;
        let mut context = String::new();
        let mut tokens = 0;
        let mut used = 0;

        for chunk in chunks {
            let block = format!(
                "[Source: {} | Department: {} | Type: {}]\n{}\n\n",
                chunk.metadata.filename,
                chunk.metadata.department,
                chunk.metadata.document_type,
                chunk.metadata.text
            );

            if !would_exceed_limit(tokens, &block, budget) {
                tokens += estimate_tokens(&block);
                context.push_str(&block);
                used += 1;
                continue;
            }

            let truncated = truncate_to_tokens(&block, budget.saturating_sub(tokens));
            if !truncated.trim().is_empty() {
                context.push_str(&truncated);
                context.push_str("\n\n");
                used += 1;
            }
            break;
        }

        (context, used)
    }

    fn build_messages(&self, context: &str, history: &[ChatRecord], question: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\nDocument context:\n\n{}",
            self.config.system_prompt, context
        ))];
        // history arrives most recent first
        for record in history.iter().rev() {
            messages.push(ChatMessage::user(&record.question));
            messages.push(ChatMessage::assistant(&record.answer));
        }
        messages.push(ChatMessage::user(question));
        messages
    }

    async fn recent_history(&self, identity: &Identity) -> Vec<ChatRecord> {
        if self.config.history_window == 0 {
            return Vec::new();
        }
        match self
            .chats
            .recent_for_user(identity.user_id, self.config.history_window as i64)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("Chat history unavailable for {}: {:#}", identity.email, e);
                Vec::new()
            }
        }
    }

    pub async fn answer(&self, identity: &Identity, request: ChatRequest) -> ApiResult<ChatResponse> {
        let started = Instant::now();
        let result = self.answer_inner(identity, &request).await;
        let elapsed = started.elapsed().as_millis();

        match &result {
            Ok(response) => self.activity.log(
                ActivityLog::builder(ActivityType::ChatAnswered)
                    .actor(identity.user_id, &identity.email)
                    .detail(format!("{} sources", response.sources.len()))
                    .duration_ms(elapsed)
                    .build(),
            ),
            Err(e) => self.activity.log(
                ActivityLog::builder(ActivityType::ChatFailed)
                    .actor(identity.user_id, &identity.email)
                    .status(ActivityStatus::Error)
                    .duration_ms(elapsed)
                    .error(e.to_string())
                    .build(),
            ),
        }
        result
    }

    async fn answer_inner(&self, identity: &Identity, request: &ChatRequest) -> ApiResult<ChatResponse> {
        let question = request.message.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".into()));
        }

        let department = request.department_filter();
        let options = SearchOptions {
            department: department.clone(),
            document_type: request.document_type_filter(),
            ..Default::default()
        };

        let chunks = self.retrieve(identity, question, &options, self.config.top_k).await?;
        if chunks.is_empty() {
            info!("No relevant documents for {}'s question", identity.email);
            return Err(ApiError::NoRelevantDocuments(
                "No relevant documents were found for this question".into(),
            ));
        }

        let (context, used) = self.build_context(&chunks);
        if used == 0 {
            warn!(
                "Context budget of {} tokens holds none of {} retrieved chunks",
                self.config.max_context_tokens,
                chunks.len()
            );
            return Err(ApiError::NoRelevantDocuments(
                "No document content fits the configured context budget".into(),
            ));
        }
        let history = self.recent_history(identity).await;
        let messages = self.build_messages(&context, &history, question);

        let (permit, waited) = self.limiters.acquire_llm().await?;
        debug!("LLM permit acquired after {:?}", waited);
        let answer = self.llm.complete(messages).await;
        drop(permit);
        let answer = answer?;

        let mut seen = HashSet::new();
        let sources: Vec<SourceRef> = chunks[..used]
            .iter()
            .filter(|c| seen.insert(c.document_id))
            .map(|c| SourceRef {
                document_id: c.document_id,
                filename: c.metadata.filename.clone(),
                department: c.metadata.department.clone(),
                document_type: c.metadata.document_type.clone(),
                score: c.score,
            })
            .collect();

        let record = ChatRecord {
            id: Uuid::new_v4(),
            user_id: identity.user_id,
            api_key_id: identity.api_key_id,
            department: department.map(|d| normalize_department(&d)),
            question: question.to_string(),
            answer: answer.clone(),
            source_document_ids: sources.iter().map(|s| s.document_id).collect(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.chats.insert(&record).await {
            error!("Failed to persist chat record for {}: {:#}", identity.email, e);
        }

        info!(
            "Answered {} from {} chunks / {} documents",
            identity.email,
            used,
            sources.len()
        );
        Ok(ChatResponse { answer, sources })
    }

    /// Retrieval without generation; chunk previews are capped at
    /// `preview_chars` characters.
    pub async fn search(
        &self,
        identity: &Identity,
        query: &str,
        options: &SearchOptions,
    ) -> ApiResult<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".into()));
        }
        let limit = options
            .limit
            .unwrap_or(self.config.top_k)
            .clamp(1, self.config.max_search_limit.max(1));

        let chunks = self.retrieve(identity, query, options, limit).await?;
        let results: Vec<SearchHit> = chunks
            .into_iter()
            .map(|c| SearchHit {
                document_id: c.document_id,
                preview: c.metadata.text.chars().take(self.config.preview_chars).collect(),
                filename: c.metadata.filename,
                department: c.metadata.department,
                document_type: c.metadata.document_type,
                chunk_index: c.metadata.chunk_index,
                score: c.score,
                tags: c.metadata.tags,
            })
            .collect();

        Ok(SearchResponse {
            query: query.to_string(),
            total: results.len(),
            results,
        })
    }

    pub async fn history(&self, identity: &Identity, limit: Option<i64>) -> ApiResult<Vec<ChatRecord>> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT);
        Ok(self.chats.recent_for_user(identity.user_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::models::{Document, Role, User};
    use crate::repositories::memory::MemoryStore;
    use crate::services::providers::{MockLlmProvider, VectorRecord};
    use crate::test_support::{EchoLlm, FailingStep, InMemoryVectorIndex, KeywordEmbedder};
    use crate::utils::error::UpstreamError;

    struct Fixture {
        service: RagService,
        store: Arc<MemoryStore>,
        index: Arc<InMemoryVectorIndex>,
    }

    fn identity(department: &str, is_admin: bool) -> Identity {
        let user = User::new("staff@orin.go.id", String::new(), None, department, Role::User);
        Identity::from_user(&user, is_admin, None)
    }

    fn fixture_with(llm: Arc<dyn LlmProvider>, tweak: impl FnOnce(&mut RagConfig)) -> Fixture {
        let settings = Settings::for_tests();
        let mut config = settings.rag.clone();
        tweak(&mut config);
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let service = RagService::new(
            store.clone(),
            store.clone(),
            Arc::new(KeywordEmbedder),
            index.clone(),
            llm,
            Arc::new(DepartmentAuthorization::new(store.clone(), &config.shared_departments)),
            Limiters::new(&settings.limits),
            config,
            ActivityLogger::disabled(),
        );
        Fixture { service, store, index }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(EchoLlm), |_| {})
    }

    /// Store a document record and index its chunks directly.
    async fn seed(fx: &Fixture, department: &str, filename: &str, chunks: &[&str]) -> Uuid {
        let id = Uuid::new_v4();
        let doc = Document {
            id,
            filename: filename.into(),
            department: department.into(),
            document_type: "policy".into(),
            description: None,
            tags: vec![],
            uploaded_by: Uuid::nil(),
            uploader_email: "admin@orin.go.id".into(),
            uploaded_at: Utc::now(),
            size_bytes: 10,
            mime_type: "text/plain".into(),
            content_hash: id.to_string(),
            storage_location: String::new(),
            chunk_count: chunks.len() as i32,
        };
        DocumentRepository::insert(fx.store.as_ref(), &doc).await.unwrap();

        let mut records = Vec::new();
        for (i, text) in chunks.iter().enumerate() {
            records.push(VectorRecord {
                id: crate::models::document::vector_id(id, i),
                values: KeywordEmbedder::vector(text),
                metadata: ChunkMetadata {
                    document_id: id.to_string(),
                    department: department.into(),
                    document_type: "policy".into(),
                    filename: filename.into(),
                    chunk_index: i as u32,
                    text: text.to_string(),
                    tags: vec!["leave".into()],
                    uploaded_by: Uuid::nil().to_string(),
                },
            });
        }
        fx.index.upsert(department, records).await.unwrap();
        id
    }

    fn ask(message: &str, department: Option<&str>) -> ChatRequest {
        ChatRequest {
            message: message.into(),
            department: department.map(str::to_string),
            document_type: None,
            context: None,
        }
    }

    #[tokio::test]
    async fn test_answer_cites_sources_and_records_chat() {
        let fx = fixture();
        let doc = seed(&fx, "hr", "leave.txt", &["vacation policy grants twelve days"]).await;

        let response = fx
            .service
            .answer(&identity("hr", false), ask("what is the vacation policy", Some("hr")))
            .await
            .unwrap();
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].document_id, doc);
        assert!(response.answer.contains("vacation policy"));
        assert_eq!(fx.store.chat_count(), 1);
    }

    #[tokio::test]
    async fn test_department_scope_is_never_widened() {
        let fx = fixture();
        seed(&fx, "hr", "hr.txt", &["vacation policy for hr"]).await;
        let finance = seed(&fx, "finance", "fin.txt", &["vacation policy for finance"]).await;

        let admin = identity("it", true);
        let chunks = fx
            .service
            .retrieve(
                &admin,
                "vacation policy",
                &SearchOptions { department: Some("hr".into()), ..Default::default() },
                10,
            )
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.metadata.department == "hr"));
        assert!(chunks.iter().all(|c| c.document_id != finance));

        // A standard hr user never sees finance, even unscoped.
        let chunks = fx
            .service
            .retrieve(&identity("hr", false), "vacation policy", &SearchOptions::default(), 10)
            .await
            .unwrap();
        assert!(chunks.iter().all(|c| c.metadata.department != "finance"));

        assert!(matches!(
            fx.service
                .answer(&identity("hr", false), ask("vacation policy", Some("finance")))
                .await,
            Err(ApiError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_mislabelled_vectors_are_dropped() {
        let fx = fixture();
        let id = seed(&fx, "finance", "fin.txt", &["budget vacation policy"]).await;
        // Same chunk written into the hr namespace but still labelled finance.
        let stray = VectorRecord {
            id: format!("{id}#99"),
            values: KeywordEmbedder::vector("budget vacation policy"),
            metadata: ChunkMetadata {
                document_id: id.to_string(),
                department: "finance".into(),
                document_type: "policy".into(),
                filename: "fin.txt".into(),
                chunk_index: 99,
                text: "budget vacation policy".into(),
                tags: vec![],
                uploaded_by: String::new(),
            },
        };
        fx.index.upsert("hr", vec![stray]).await.unwrap();

        let err = fx
            .service
            .answer(&identity("hr", false), ask("vacation policy", Some("hr")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoRelevantDocuments(_)));
    }

    #[tokio::test]
    async fn test_deleted_documents_are_not_retrieved() {
        let fx = fixture();
        let doc = seed(&fx, "hr", "leave.txt", &["vacation policy text"]).await;
        // Record gone, vectors still present: stale index entries must not surface.
        DocumentRepository::delete(fx.store.as_ref(), doc).await.unwrap();

        let err = fx
            .service
            .answer(&identity("hr", false), ask("vacation policy", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoRelevantDocuments(_)));
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_min_score_filters_weak_matches() {
        let fx = fixture_with(Arc::new(EchoLlm), |c| c.min_score = 0.99);
        seed(&fx, "hr", "leave.txt", &["vacation policy plus many unrelated words here"]).await;
        assert!(matches!(
            fx.service.answer(&identity("hr", false), ask("vacation", None)).await,
            Err(ApiError::NoRelevantDocuments(_))
        ));
    }

    #[tokio::test]
    async fn test_upstream_failures_are_retryable_not_empty() {
        let fx = fixture();
        seed(&fx, "hr", "leave.txt", &["vacation policy"]).await;
        fx.index.fail_on(FailingStep::Query);

        let err = fx
            .service
            .answer(&identity("hr", false), ask("vacation policy", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_llm_timeout_is_unavailable_and_nothing_recorded() {
        let mut llm = MockLlmProvider::new();
        llm.expect_complete()
            .times(1)
            .returning(|_| Err(UpstreamError::Timeout { service: "chat completion" }));
        let fx = fixture_with(Arc::new(llm), |_| {});
        seed(&fx, "hr", "leave.txt", &["vacation policy"]).await;

        let err = fx
            .service
            .answer(&identity("hr", false), ask("vacation policy", None))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fx.store.chat_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_carries_history_oldest_first() {
        let mut llm = MockLlmProvider::new();
        let mut call = 0;
        llm.expect_complete().times(2).returning(move |messages| {
            call += 1;
            if call == 2 {
                // system, previous user, previous assistant, current user
                assert_eq!(messages.len(), 4);
                assert_eq!(messages[1].content, "first question about vacation");
                assert_eq!(messages[2].role, "assistant");
                assert_eq!(messages[3].content, "second question about vacation");
                assert!(messages[0].content.contains("[Source: leave.txt"));
            }
            Ok(format!("answer {call}"))
        });
        let fx = fixture_with(Arc::new(llm), |_| {});
        seed(&fx, "hr", "leave.txt", &["vacation policy"]).await;
        let user = identity("hr", false);

        fx.service.answer(&user, ask("first question about vacation", None)).await.unwrap();
        fx.service.answer(&user, ask("second question about vacation", None)).await.unwrap();

        let history = fx.service.history(&user, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].answer, "answer 2");
    }

    #[tokio::test]
    async fn test_context_budget_truncates_and_limits_sources() {
        let fx = fixture_with(Arc::new(EchoLlm), |c| c.max_context_tokens = 40);
        let long = "vacation ".repeat(60);
        seed(&fx, "hr", "a.txt", &[long.as_str()]).await;
        seed(&fx, "hr", "b.txt", &["vacation days"]).await;

        let chunks = fx
            .service
            .retrieve(&identity("hr", false), "vacation", &SearchOptions::default(), 5)
            .await
            .unwrap();
        assert_eq!(chunks[0].metadata.filename, "a.txt");
        let (context, used) = fx.service.build_context(&chunks);
        assert_eq!(used, 1);
        assert!(!context.contains("b.txt"));
        assert!(estimate_tokens(&context) <= 40);
    }

    #[tokio::test]
    async fn test_empty_context_never_reaches_the_llm() {
        // no expectations: any completion call panics
        let fx = fixture_with(Arc::new(MockLlmProvider::new()), |c| c.max_context_tokens = 5);
        seed(&fx, "hr", "leave.txt", &["vacation policy grants twelve days"]).await;

        let err = fx
            .service
            .answer(&identity("hr", false), ask("vacation policy", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoRelevantDocuments(_)), "{err}");
        assert_eq!(fx.store.chat_count(), 0);
    }

    #[tokio::test]
    async fn test_search_returns_capped_previews() {
        let fx = fixture_with(Arc::new(EchoLlm), |c| c.preview_chars = 20);
        seed(&fx, "hr", "leave.txt", &["vacation policy grants twelve working days per year"]).await;

        let response = fx
            .service
            .search(&identity("hr", false), "vacation", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].preview.chars().count(), 20);
        assert_eq!(response.results[0].filename, "leave.txt");
    }
}
