use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::RetrievedDocument;

/// Qdrant collection accessed over its REST API. Documents are stored whole,
/// one point per file.
#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    known_vector_size: Arc<RwLock<Option<usize>>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            known_vector_size: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    pub async fn recreate_collection(&self, vector_size: usize) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .context("failed to contact qdrant while dropping collection")?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(qdrant_error("drop collection", response).await);
        }

        *self.known_vector_size.write().await = None;
        self.sync_collection(vector_size).await.map(|_| ())
    }

    /// Creates the collection when it does not exist yet. An existing
    /// collection is left untouched. Returns true when it had to be created.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<bool> {
        {
            let known = self.known_vector_size.read().await;
            if *known == Some(vector_size) {
                return Ok(false);
            }
        }
        self.sync_collection(vector_size).await
    }

    /// Same as [`ensure_collection`](Self::ensure_collection) but always asks
    /// Qdrant, so a collection dropped behind our back is noticed.
    pub async fn sync_collection(&self, vector_size: usize) -> Result<bool> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .context("failed to contact qdrant while checking collection")?;

        let mut created = false;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(collection = %self.collection, vector_size, "creating collection");
            let payload = json!({
                "vectors": {
                    "size": vector_size,
                    "distance": "Cosine"
                }
            });

            let response = self
                .client
                .put(self.collection_url())
                .json(&payload)
                .send()
                .await
                .context("failed to contact qdrant while creating collection")?;
            if !response.status().is_success() {
                return Err(qdrant_error("create collection", response).await);
            }
            created = true;
        } else if !response.status().is_success() {
            return Err(qdrant_error("get collection", response).await);
        }

        *self.known_vector_size.write().await = Some(vector_size);
        Ok(created)
    }

    pub async fn upsert_points(&self, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let vector_size = points[0].vector.len();
        self.ensure_collection(vector_size).await?;

        let url = format!("{}/points?wait=true", self.collection_url());
        let body = json!({ "points": points });

        let response = self
            .client
            .put(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during upsert")?;
        if !response.status().is_success() {
            return Err(qdrant_error("upsert", response).await);
        }

        Ok(())
    }

    pub async fn delete_documents(&self, doc_ids: &[String]) -> Result<()> {
        if doc_ids.is_empty() {
            return Ok(());
        }

        let url = format!("{}/points/delete?wait=true", self.collection_url());
        let ids: Vec<String> = doc_ids.iter().map(|id| point_id(id)).collect();

        let response = self
            .client
            .post(url)
            .json(&json!({ "points": ids }))
            .send()
            .await
            .context("failed to contact qdrant during delete")?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(qdrant_error("delete", response).await);
        }

        Ok(())
    }

    /// Nearest neighbours for `vector`. A collection that was never created
    /// yields no hits rather than an error.
    pub async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievedDocument>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let url = format!("{}/points/search", self.collection_url());
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during search")?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::warn!(collection = %self.collection, "search against missing collection");
            return Ok(vec![]);
        }
        if !response.status().is_success() {
            return Err(qdrant_error("search", response).await);
        }

        let response = response
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(hits_from_response(response))
    }
}

/// Qdrant only accepts integers or UUIDs as point ids, so file paths are
/// mapped onto stable UUIDv5 values.
pub fn point_id(doc_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, doc_id.as_bytes()).to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

impl QdrantPoint {
    pub fn for_document(doc_id: &str, text: &str, vector: Vec<f32>) -> Self {
        Self {
            id: point_id(doc_id),
            vector,
            payload: QdrantPayload {
                doc_id: Some(doc_id.to_string()),
                source: Some(doc_id.to_string()),
                text: Some(text.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantPayload {
    pub doc_id: Option<String>,
    pub source: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}

fn hits_from_response(response: QdrantSearchResponse) -> Vec<RetrievedDocument> {
    response
        .result
        .into_iter()
        .filter_map(|point| {
            let payload = point.payload?;
            let text = payload.text?;
            let doc_id = payload
                .doc_id
                .or_else(|| payload.source.clone())
                .unwrap_or_default();
            Some(RetrievedDocument {
                source: payload.source.unwrap_or_else(|| doc_id.clone()),
                doc_id,
                text,
                score: point.score,
            })
        })
        .collect()
}

async fn qdrant_error(action: &str, response: Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::anyhow!("qdrant {action} returned {status}: {}", normalize_err_body(&body))
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.pointer("/status/error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
