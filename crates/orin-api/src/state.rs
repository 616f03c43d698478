use anyhow::Result;
use axum::extract::FromRef;
use std::sync::Arc;

use crate::auth::JwtManager;
use crate::config::Settings;
use crate::document::TextChunker;
use crate::logging::ActivityLogger;
use crate::repositories::{ApiKeyRepository, ChatRepository, DocumentRepository, UserRepository};
use crate::security::DepartmentAuthorization;
use crate::services::{
    AuthService, DocumentService, EmbeddingProvider, LlmProvider, PortalClient, RagService,
    VectorIndex,
};
use crate::utils::limiters::Limiters;

/// Storage and external collaborators the services are wired from.
pub struct Backends {
    pub users: Arc<dyn UserRepository>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub chats: Arc<dyn ChatRepository>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub llm: Arc<dyn LlmProvider>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub document_service: Arc<DocumentService>,
    pub rag_service: Arc<RagService>,
    pub authorization: Arc<DepartmentAuthorization>,
    pub documents: Arc<dyn DocumentRepository>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub portal: Option<PortalClient>,
    pub activity: ActivityLogger,
}

impl AppState {
    pub fn new(
        settings: Settings,
        backends: Backends,
        activity: ActivityLogger,
        portal: Option<PortalClient>,
    ) -> Result<Self> {
        let authorization = Arc::new(DepartmentAuthorization::new(
            backends.documents.clone(),
            &settings.rag.shared_departments,
        ));
        let jwt = Arc::new(JwtManager::new(
            &settings.auth.jwt_secret,
            settings.auth.access_token_expire_minutes * 60,
        ));

        let auth_service = Arc::new(AuthService::new(
            backends.users.clone(),
            backends.api_keys.clone(),
            jwt,
            &settings.auth.admin_emails,
            activity.clone(),
        ));

        let document_service = Arc::new(DocumentService::new(
            backends.documents.clone(),
            backends.embedder.clone(),
            backends.vector_index.clone(),
            authorization.clone(),
            TextChunker::new(settings.rag.chunk_size, settings.rag.chunk_overlap)?,
            settings.upload.clone(),
            activity.clone(),
        ));

        let rag_service = Arc::new(RagService::new(
            backends.documents.clone(),
            backends.chats.clone(),
            backends.embedder.clone(),
            backends.vector_index.clone(),
            backends.llm.clone(),
            authorization.clone(),
            Limiters::new(&settings.limits),
            settings.rag.clone(),
            activity.clone(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            auth_service,
            document_service,
            rag_service,
            authorization,
            documents: backends.documents,
            vector_index: backends.vector_index,
            portal,
            activity,
        })
    }
}

impl FromRef<AppState> for Arc<RagService> {
    fn from_ref(state: &AppState) -> Self {
        state.rag_service.clone()
    }
}

impl FromRef<AppState> for Arc<DocumentService> {
    fn from_ref(state: &AppState) -> Self {
        state.document_service.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth_service.clone()
    }
}
