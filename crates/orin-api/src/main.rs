use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use orin_api::config::Settings;
use orin_api::database::{DbPool, PgStore};
use orin_api::logging::{ActivityLogger, LoggerConfig};
use orin_api::services::{EmbeddingService, LlmService, PineconeIndex, PortalClient};
use orin_api::{build_router, AppState, Backends};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orin_api=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting ORIN API server v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    db_pool.migrate().await?;
    info!("Database connection established, migrations applied");

    let store = Arc::new(PgStore::new(db_pool));

    let activity = if settings.audit.enabled {
        ActivityLogger::new(store.clone(), LoggerConfig::from(&settings.audit))
    } else {
        ActivityLogger::disabled()
    };

    let embedder = Arc::new(EmbeddingService::new(&settings.openai)?);
    let vector_index =
        Arc::new(PineconeIndex::connect(&settings.pinecone, embedder.dimension()).await?);
    let llm = Arc::new(LlmService::new(&settings.openai)?);
    let portal = PortalClient::from_config(&settings.portal)?;
    if portal.is_none() {
        info!("Portal integration not configured");
    }

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let backends = Backends {
        users: store.clone(),
        api_keys: store.clone(),
        documents: store.clone(),
        chats: store,
        embedder,
        vector_index,
        llm,
    };
    let state = AppState::new(settings, backends, activity, portal)?;
    let app = build_router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
