use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub use_hf_local: bool,
    pub hf_local_model: String,
    pub use_openai: bool,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub storage_dir: PathBuf,
    pub docs_glob: String,
    pub top_k: usize,
    pub qdrant_base_url: String,
    pub qdrant_collection: String,
    pub embedding_model: String,
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let storage_dir = env::var("RAG_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./storage"));

        Self {
            bind_addr: env::var("RAG_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            storage_dir,
            docs_glob: env::var("RAG_DOCS_GLOB")
                .unwrap_or_else(|_| "data/travel_docs/*".to_string()),
            top_k: env::var("RAG_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|k| *k > 0)
                .unwrap_or(4),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection: env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "travel_docs".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "sentence-transformers/all-MiniLM-L6-v2".to_string()),
            generation: GenerationConfig {
                use_hf_local: env_flag("USE_HF_LOCAL", true),
                hf_local_model: env::var("HF_LOCAL_MODEL")
                    .unwrap_or_else(|_| "google/flan-t5-small".to_string()),
                use_openai: env_flag("USE_OPENAI", false),
                openai_api_key: env::var("OPENAI_API_KEY")
                    .ok()
                    .filter(|key| !key.trim().is_empty()),
                openai_model: env::var("OPENAI_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                openai_base_url: env::var("OPENAI_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            },
        }
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.storage_dir.join("models")
    }

    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.storage_dir.join("registry.sqlite3").display()
        )
    }
}

/// Only the literal `true` (any case) enables a flag; anything else set in
/// the environment disables it.
fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => value.trim().eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}
