use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use searchhub_backend::routes::configure_routes;
use searchhub_backend::services::dedup::DedupCache;
use searchhub_backend::services::llm::{EmbeddingClient, OpenAiClient};
use searchhub_backend::services::orchestrator::{OrchestratorConfig, RagOrchestrator};
use searchhub_backend::services::search_provider::SerperClient;
use searchhub_backend::services::store::{MemorySearchStore, SearchStore};
use searchhub_backend::services::vector_index::{MemoryVectorIndex, QdrantVectorIndex, VectorIndex};
use searchhub_backend::state::AppState;
use searchhub_config::AppConfig;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    log::info!("Starting SearchHub backend...");

    // Missing credentials are fatal here, never per-request.
    let config = AppConfig::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let llm = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.chat_model.clone(),
        config.embedding_model.clone(),
    ));
    let retriever = Arc::new(SerperClient::new(config.serper_api_key.clone()));
    let store: Arc<dyn SearchStore> = Arc::new(MemorySearchStore::new());

    let index: Arc<dyn VectorIndex> = match &config.qdrant_url {
        Some(url) => {
            log::info!("Connecting to Qdrant at {url}...");
            let dimension = llm.embedding_dimension().unwrap_or(1536) as u64;
            let qdrant = QdrantVectorIndex::new(url, "searches", dimension)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Arc::new(qdrant)
        }
        None => {
            log::info!("QDRANT_URL not set, using in-memory vector index");
            Arc::new(MemoryVectorIndex::new())
        }
    };

    let dedup = Arc::new(DedupCache::new(
        llm.clone(),
        index,
        config.dedup_min_similarity,
    ));
    let _backfill = dedup.clone().spawn_backfill(
        store.clone(),
        Duration::from_secs(config.backfill_interval_secs),
        config.backfill_batch_size,
    );
    log::info!(
        "Embedding backfill job running every {}s (batch {})",
        config.backfill_interval_secs,
        config.backfill_batch_size
    );

    let orchestrator = Arc::new(RagOrchestrator::new(
        store.clone(),
        retriever,
        llm,
        dedup,
        OrchestratorConfig {
            generate_related: config.related_questions_enabled,
            ..Default::default()
        },
    ));

    let state = web::Data::new(AppState::new(store, orchestrator));

    let host = config.backend_host.clone();
    let port = config.backend_port;
    log::info!("Binding to {host}:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
