use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Synchronous batch embedding, run by [`Embedder`] on the blocking pool.
pub trait EmbeddingBackend: Send + Sync {
    fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

impl EmbeddingBackend for TextEmbedding {
    fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, None)
    }
}

/// Local sentence-embedding model. Inference is CPU bound, so every call is
/// moved onto the blocking pool.
#[derive(Clone)]
pub struct Embedder {
    model: Arc<dyn EmbeddingBackend>,
    model_name: String,
    dimension: usize,
}

impl Embedder {
    pub async fn load(model_name: &str, cache_dir: PathBuf) -> Result<Self> {
        let model = resolve_embedding_model(model_name)?;
        let dimension = embedding_dimension(&model)?;
        tracing::info!(model = model_name, dimension, "loading embedding model");

        let embedding = tokio::task::spawn_blocking(move || {
            let options = InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true);
            TextEmbedding::try_new(options)
        })
        .await
        .context("embedding model load task panicked")?
        .with_context(|| format!("failed to initialize embedding model {model_name}"))?;

        Ok(Self::from_backend(Arc::new(embedding), model_name, dimension))
    }

    pub fn from_backend(
        model: Arc<dyn EmbeddingBackend>,
        model_name: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            dimension,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedding model returned no vector"))
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let expected = texts.len();
        let model = Arc::clone(&self.model);
        let vectors = tokio::task::spawn_blocking(move || model.embed_texts(texts))
            .await
            .context("embedding task panicked")?
            .with_context(|| format!("failed to embed with {}", self.model_name))?;

        if vectors.len() != expected {
            anyhow::bail!(
                "embedding model returned {} vectors for {} inputs",
                vectors.len(),
                expected
            );
        }

        Ok(vectors)
    }
}

/// Maps a configured model name (Hugging Face style, with or without the
/// organisation prefix) onto a model the ONNX runtime ships.
pub fn resolve_embedding_model(name: &str) -> Result<EmbeddingModel> {
    let short = name
        .trim()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches("-onnx")
        .to_ascii_lowercase();

    let known = match short.as_str() {
        "all-minilm-l6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Some(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Some(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Some(EmbeddingModel::NomicEmbedTextV15),
        "paraphrase-multilingual-minilm-l12-v2" => Some(EmbeddingModel::ParaphraseMLMiniLML12V2),
        _ => None,
    };
    if let Some(model) = known {
        return Ok(model);
    }

    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| {
            let code = info.model_code.to_ascii_lowercase();
            code == name.trim().to_ascii_lowercase()
                || code.rsplit('/').next().map(|s| s.trim_end_matches("-onnx"))
                    == Some(short.as_str())
        })
        .map(|info| info.model)
        .ok_or_else(|| anyhow::anyhow!("unsupported embedding model: {name}"))
}

fn embedding_dimension(model: &EmbeddingModel) -> Result<usize> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| &info.model == model)
        .map(|info| info.dim)
        .ok_or_else(|| anyhow::anyhow!("no dimension known for embedding model {model:?}"))
}
