use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: &'static str,
    database: String,
    vector_index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    indexed_vectors: Option<u64>,
}

pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: "Department-scoped document question answering",
    })
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Ready only when both the database and the vector index answer.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match state.documents.ping().await {
        Ok(()) => None,
        Err(e) => {
            warn!("Readiness: database unavailable: {:#}", e);
            Some(e.to_string())
        }
    };
    let (index, indexed_vectors) = match state.vector_index.stats().await {
        Ok(stats) => (None, Some(stats.total_vector_count)),
        Err(e) => {
            warn!("Readiness: vector index unavailable: {}", e);
            (Some(e.to_string()), None)
        }
    };

    let ready = database.is_none() && index.is_none();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unavailable" },
            database: database.unwrap_or_else(|| "ok".into()),
            vector_index: index.unwrap_or_else(|| "ok".into()),
            indexed_vectors,
        }),
    )
}
