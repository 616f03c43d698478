pub mod api_key;
pub mod auth;
pub mod chat;
pub mod document;
pub mod user;

pub use api_key::ApiKey;
pub use chat::{ChatRecord, SourceRef};
pub use document::{Document, DocumentFilter, DocumentStats};
pub use user::{Role, User};
