use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use travel_rag::embedding::Embedder;
use travel_rag::generation::Generator;
use travel_rag::indexer::Indexer;
use travel_rag::rag::RagPipeline;
use travel_rag::registry::Registry;
use travel_rag::vector_store::QdrantStore;
use travel_rag::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let registry = Registry::new(&config).await?;
    let embedder = Embedder::load(&config.embedding_model, config.model_cache_dir()).await?;
    let store = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let generator = Generator::from_config(&config.generation)?;

    let generation_limit = Arc::new(Semaphore::new(1));

    let rag = RagPipeline::new(
        embedder.clone(),
        store.clone(),
        generator,
        config.top_k,
        generation_limit,
    );

    let indexer = Indexer::new(config.clone(), registry.clone(), embedder, store);

    run_server(config, registry, rag, indexer).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
