pub mod auth_service;
pub mod document_service;
pub mod embedding_service;
pub mod llm_service;
pub mod portal;
pub mod providers;
pub mod rag_service;
pub mod vector_index;

pub use auth_service::AuthService;
pub use document_service::DocumentService;
pub use embedding_service::EmbeddingService;
pub use llm_service::LlmService;
pub use portal::PortalClient;
pub use providers::{EmbeddingProvider, LlmProvider, VectorIndex};
pub use rag_service::RagService;
pub use vector_index::PineconeIndex;
