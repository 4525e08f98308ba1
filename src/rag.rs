use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::Semaphore;

use crate::embedding::Embedder;
use crate::generation::{BackendKind, Generator};
use crate::models::RetrievedDocument;
use crate::vector_store::QdrantStore;

pub const NO_DOCS_CONTEXT: &str = "No docs found.";

/// Retrieve-then-generate pipeline behind `POST /ask`.
#[derive(Clone)]
pub struct RagPipeline {
    embedder: Embedder,
    store: QdrantStore,
    generator: Generator,
    top_k: usize,
    generation_limit: Arc<Semaphore>,
}

impl RagPipeline {
    pub fn new(
        embedder: Embedder,
        store: QdrantStore,
        generator: Generator,
        top_k: usize,
        generation_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            top_k,
            generation_limit,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.generator.kind()
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    pub async fn query(&self, question: &str) -> Result<String> {
        self.query_with_sources(question)
            .await
            .map(|(answer, _)| answer)
    }

    /// Answers `question` and hands back the documents the answer was
    /// grounded on, in rank order.
    pub async fn query_with_sources(
        &self,
        question: &str,
    ) -> Result<(String, Vec<RetrievedDocument>)> {
        let started = Instant::now();

        let retrieved = self.retrieve(question).await?;
        tracing::debug!(
            hits = retrieved.len(),
            sources = ?retrieved.iter().map(|doc| doc.source.as_str()).collect::<Vec<_>>(),
            "retrieved context"
        );
        let context = build_context(&retrieved);

        let _permit = self.generation_limit.acquire().await?;
        let answer = self.generator.generate(question, &context).await?;

        tracing::info!(
            backend = self.generator.kind().as_str(),
            hits = retrieved.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );
        Ok((answer, retrieved))
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedDocument>> {
        let embedding = self.embedder.embed_one(question).await?;
        self.store.search(&embedding, self.top_k).await
    }
}

/// Joins retrieved texts with a blank line; falls back to a fixed marker
/// when nothing came back.
pub fn build_context(retrieved: &[RetrievedDocument]) -> String {
    if retrieved.is_empty() {
        return NO_DOCS_CONTEXT.to_string();
    }

    retrieved
        .iter()
        .map(|doc| doc.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
