use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

/// A file read from the document directory, keyed by its globbed path.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub text: String,
    pub content_hash: String,
}

impl SourceDocument {
    pub fn byte_len(&self) -> i64 {
        self.text.len() as i64
    }
}

/// A nearest-neighbour hit returned by the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    pub collection: String,
    pub id: String,
    pub source: String,
    pub content_hash: String,
    pub byte_len: i64,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexRequest {
    #[serde(default)]
    pub rebuild: bool,
    #[serde(default)]
    pub prune: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStatus {
    pub job_id: String,
    pub status: String,
    pub stage: String,
    pub message: Option<String>,
    pub total_files: i64,
    pub indexed_count: i64,
    pub skipped_count: i64,
    pub removed_count: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexStatus {
    pub fn started(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: "started".to_string(),
            stage: "queued".to_string(),
            message: None,
            total_files: 0,
            indexed_count: 0,
            skipped_count: 0,
            removed_count: 0,
            started_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub collection: String,
}
