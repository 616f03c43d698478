use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::auth::{require_admin, require_auth};
use crate::handlers::{admin, auth, chat, documents, health, portal};
use crate::state::AppState;

/// Headroom for multipart framing and form fields on top of file bytes.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload = &state.settings.upload;
    let body_limit = upload
        .max_file_size
        .saturating_mul(upload.max_files_per_batch.max(1))
        .saturating_add(FORM_OVERHEAD_BYTES);

    // Public routes
    let public_routes = Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    // Admin routes; require_admin runs after require_auth
    let admin_routes = Router::new()
        .route("/dashboard", get(admin::dashboard))
        .route("/documents/upload", post(admin::bulk_upload))
        .route("/documents/search", post(admin::search_documents))
        .route("/documents/stats", get(admin::document_stats))
        .route("/documents", delete(admin::delete_documents))
        .route("/documents/{id}", delete(admin::delete_document))
        .route("/users", post(admin::create_user).get(admin::list_users))
        .route("/users/{id}", put(admin::update_user))
        .route("/api-keys/{id}", delete(auth::revoke_api_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    // Authenticated routes
    let protected_routes = Router::new()
        .route("/auth/profile", get(auth::profile).put(auth::update_profile))
        .route("/auth/verify", get(auth::verify))
        .route("/auth/api-keys", post(auth::create_api_key).get(auth::list_api_keys))
        .route("/auth/api-keys/{id}", delete(auth::revoke_api_key))
        .route("/api/v1/chat", post(chat::chat_handler))
        .route("/api/v1/chat/api-key", post(chat::chat_api_key_handler))
        .route("/api/v1/chat/history", get(chat::history_handler))
        .route("/api/v1/documents/upload", post(documents::upload_handler))
        .route("/api/v1/documents/search", get(documents::search_handler))
        .route("/api/v1/documents", get(documents::list_handler))
        .route("/api/v1/documents/{id}", get(documents::get_handler))
        .route("/api/v1/portal/{data_type}", get(portal::user_data))
        .nest("/admin", admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(state)
}
