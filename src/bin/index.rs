use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use travel_rag::config::AppConfig;
use travel_rag::embedding::Embedder;
use travel_rag::indexer::Indexer;
use travel_rag::models::IndexRequest;
use travel_rag::registry::Registry;
use travel_rag::vector_store::QdrantStore;

#[derive(Parser, Debug)]
#[command(name = "index")]
#[command(about = "Index travel policy documents into the vector store")]
struct Cli {
    /// Overrides RAG_DOCS_GLOB.
    #[arg(long)]
    glob: Option<String>,
    /// Drop and recreate the collection, re-embedding every document.
    #[arg(long, default_value_t = false)]
    rebuild: bool,
    /// Remove documents that no longer exist on disk.
    #[arg(long, default_value_t = false)]
    prune: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(glob) = cli.glob {
        config.docs_glob = glob;
    }
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let registry = Registry::new(&config).await?;
    let embedder = Embedder::load(&config.embedding_model, config.model_cache_dir()).await?;
    let store = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let indexer = Indexer::new(config, registry, embedder, store);

    let request = IndexRequest {
        rebuild: cli.rebuild,
        prune: cli.prune,
    };

    let job_id = format!("cli-{}", uuid::Uuid::new_v4());
    let report = indexer
        .index(&job_id, request, |status| {
            println!(
                "[{}] {} files={} indexed={} skipped={} {}",
                status.status,
                status.stage,
                status.total_files,
                status.indexed_count,
                status.skipped_count,
                status.message.unwrap_or_default()
            );
        })
        .await?;

    println!("{}", report.message);
    if report.total_files > 0 {
        println!(
            "files={} indexed={} skipped={} removed={}",
            report.total_files, report.indexed, report.skipped, report.removed
        );
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
