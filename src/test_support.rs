//! In-process stand-ins for Qdrant and the embedding model, so the indexer
//! and the query pipeline can be driven end to end without a network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{AppConfig, GenerationConfig};
use crate::embedding::{Embedder, EmbeddingBackend};
use crate::registry::Registry;

pub const TEST_DIMENSION: usize = 3;

/// Deterministic vectors derived from the text length.
struct LengthEmbedding;

impl EmbeddingBackend for LengthEmbedding {
    fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| vec![text.len() as f32, 1.0, 0.5])
            .collect())
    }
}

pub fn test_embedder() -> Embedder {
    Embedder::from_backend(Arc::new(LengthEmbedding), "length-embedding", TEST_DIMENSION)
}

pub async fn temp_registry() -> (TempDir, Registry) {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("sqlite://{}", dir.path().join("registry.sqlite3").display());
    let registry = Registry::open(&dsn).await.unwrap();
    (dir, registry)
}

pub fn test_config(docs_dir: &Path, qdrant_base_url: &str, collection: &str) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        storage_dir: docs_dir.join("storage"),
        docs_glob: format!("{}/*", docs_dir.display()),
        top_k: 4,
        qdrant_base_url: qdrant_base_url.to_string(),
        qdrant_collection: collection.to_string(),
        embedding_model: "length-embedding".to_string(),
        generation: GenerationConfig {
            use_hf_local: false,
            hf_local_model: "google/flan-t5-small".to_string(),
            use_openai: false,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "http://127.0.0.1:9".to_string(),
        },
    }
}

#[derive(Default)]
struct StubState {
    /// Collection name -> points in upsert order.
    collections: HashMap<String, Vec<Value>>,
    calls: Vec<String>,
}

type Shared = Arc<Mutex<StubState>>;

/// Minimal Qdrant REST server covering the calls `QdrantStore` makes.
/// Search returns stored points in upsert order with descending scores.
pub struct StubQdrant {
    pub base_url: String,
    state: Shared,
}

impl StubQdrant {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route(
                "/collections/:name",
                get(get_collection)
                    .put(create_collection)
                    .delete(delete_collection),
            )
            .route("/collections/:name/points", put(upsert_points))
            .route("/collections/:name/points/search", post(search_points))
            .route("/collections/:name/points/delete", post(delete_points))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Calls seen so far, as `"<OP> <collection>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// `doc_id` payloads stored in `collection`, or None if it does not exist.
    pub fn doc_ids(&self, collection: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state.collections.get(collection).map(|points| {
            points
                .iter()
                .filter_map(|p| p["payload"]["doc_id"].as_str().map(str::to_string))
                .collect()
        })
    }

    /// Drops every collection, as a Qdrant restart without persistence would.
    pub fn wipe(&self) {
        self.state.lock().unwrap().collections.clear();
    }
}

fn record<'a>(state: &'a Shared, op: &str, name: &str) -> std::sync::MutexGuard<'a, StubState> {
    let mut guard = state.lock().unwrap();
    guard.calls.push(format!("{op} {name}"));
    guard
}

fn not_found(name: &str) -> Response {
    let error = format!("Not found: Collection `{name}` doesn't exist!");
    let body = json!({ "status": { "error": error } });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

fn ok(result: Value) -> Response {
    Json(json!({ "result": result, "status": "ok", "time": 0.0 })).into_response()
}

async fn get_collection(State(state): State<Shared>, UrlPath(name): UrlPath<String>) -> Response {
    let guard = record(&state, "GET", &name);
    if guard.collections.contains_key(&name) {
        ok(json!({ "status": "green" }))
    } else {
        not_found(&name)
    }
}

async fn create_collection(
    State(state): State<Shared>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    let mut guard = record(&state, "CREATE", &name);
    guard.collections.entry(name).or_default();
    ok(json!(true))
}

async fn delete_collection(
    State(state): State<Shared>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    let mut guard = record(&state, "DROP", &name);
    guard.collections.remove(&name);
    ok(json!(true))
}

async fn upsert_points(
    State(state): State<Shared>,
    UrlPath(name): UrlPath<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut guard = record(&state, "UPSERT", &name);
    let Some(points) = guard.collections.get_mut(&name) else {
        return not_found(&name);
    };
    for point in body["points"].as_array().cloned().unwrap_or_default() {
        points.retain(|existing| existing["id"] != point["id"]);
        points.push(point);
    }
    ok(json!({ "status": "completed" }))
}

async fn delete_points(
    State(state): State<Shared>,
    UrlPath(name): UrlPath<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut guard = record(&state, "DELETE", &name);
    let Some(points) = guard.collections.get_mut(&name) else {
        return not_found(&name);
    };
    let ids = body["points"].as_array().cloned().unwrap_or_default();
    points.retain(|point| !ids.contains(&point["id"]));
    ok(json!({ "status": "completed" }))
}

async fn search_points(
    State(state): State<Shared>,
    UrlPath(name): UrlPath<String>,
    Json(body): Json<Value>,
) -> Response {
    let guard = record(&state, "SEARCH", &name);
    let Some(points) = guard.collections.get(&name) else {
        return not_found(&name);
    };
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;
    let hits: Vec<Value> = points
        .iter()
        .take(limit)
        .enumerate()
        .map(|(rank, point)| {
            json!({
                "id": point["id"],
                "score": 1.0 - rank as f64 * 0.1,
                "payload": point["payload"],
            })
        })
        .collect();
    ok(Value::Array(hits))
}
