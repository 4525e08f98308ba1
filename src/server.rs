use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::indexer::{IndexReport, Indexer};
use crate::models::{
    AskRequest, AskResponse, HealthResponse, IndexRequest, IndexResponse, IndexStatus,
    IndexedDocument,
};
use crate::rag::RagPipeline;
use crate::registry::Registry;

#[derive(Clone)]
struct AppState {
    registry: Registry,
    rag: RagPipeline,
    indexer: Indexer,
    jobs: Arc<Mutex<HashMap<String, IndexStatus>>>,
    index_running: Arc<tokio::sync::Mutex<()>>,
}

pub async fn run_server(
    config: AppConfig,
    registry: Registry,
    rag: RagPipeline,
    indexer: Indexer,
) -> Result<()> {
    let state = AppState {
        registry,
        rag,
        indexer,
        jobs: Arc::new(Mutex::new(HashMap::new())),
        index_running: Arc::new(tokio::sync::Mutex::new(())),
    };

    let app = Router::new()
        .route("/ask", post(ask_handler))
        .route("/health", get(health_handler))
        .route("/api/index", post(start_index))
        .route("/api/index/:job_id", get(get_index_status))
        .route("/api/documents", get(list_documents))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let query = validate_query(&request.query)?;
    let answer = state.rag.query(query).await?;
    Ok(Json(AskResponse { answer }))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.rag.backend().as_str().to_string(),
        collection: state.rag.collection().to_string(),
    })
}

async fn start_index(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IndexResponse>, ApiError> {
    let request = parse_index_request(&body)?;

    let guard = Arc::clone(&state.index_running)
        .try_lock_owned()
        .map_err(|_| ApiError::conflict("an index job is already running".to_string()))?;

    let job_id = Uuid::new_v4().to_string();
    let initial = IndexStatus::started(job_id.clone());
    {
        let mut jobs = state
            .jobs
            .lock()
            .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?;
        jobs.insert(job_id.clone(), initial.clone());
    }
    state.registry.upsert_index_status(&initial).await?;

    let state_for_task = state.clone();
    let job_id_for_task = job_id.clone();
    tokio::spawn(async move {
        let _guard = guard;
        let jobs = state_for_task.jobs.clone();

        let callback = |status: IndexStatus| {
            if let Ok(mut jobs) = jobs.lock() {
                jobs.insert(status.job_id.clone(), status);
            }
        };

        let result: Result<IndexReport> = state_for_task
            .indexer
            .index(&job_id_for_task, request, callback)
            .await;

        match result {
            Ok(_) => settle_job(&state_for_task.jobs, &job_id_for_task, None),
            Err(err) => {
                tracing::error!("index job {} failed: {:#}", job_id_for_task, err);
                let mut failed_status = IndexStatus::started(job_id_for_task.clone());
                failed_status.status = "failed".to_string();
                failed_status.stage = "error".to_string();
                failed_status.message = Some(format!("{err:#}"));
                failed_status.started_at = initial.started_at;
                failed_status.updated_at = Utc::now();

                let written = state_for_task
                    .registry
                    .upsert_index_status(&failed_status)
                    .await;
                let unsaved = match written {
                    Ok(()) => None,
                    Err(write_err) => {
                        tracing::warn!(
                            "failed to record failure of index job {}: {:#}",
                            job_id_for_task,
                            write_err
                        );
                        Some(failed_status)
                    }
                };
                settle_job(&state_for_task.jobs, &job_id_for_task, unsaved);
            }
        }
    });

    Ok(Json(IndexResponse {
        job_id,
        status: "started".to_string(),
    }))
}

async fn get_index_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<IndexStatus>, ApiError> {
    if let Some(status) = state
        .jobs
        .lock()
        .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?
        .get(&job_id)
        .cloned()
    {
        return Ok(Json(status));
    }

    match state.registry.get_index_status(&job_id).await? {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::not_found(format!("index job not found: {}", job_id))),
    }
}

async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<IndexedDocument>>, ApiError> {
    Ok(Json(
        state
            .registry
            .list_documents(state.rag.collection())
            .await?,
    ))
}

/// An empty body means default options; anything else must be a valid
/// `IndexRequest`.
fn parse_index_request(body: &[u8]) -> Result<IndexRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(IndexRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("invalid index request: {err}")))
}

/// Drops a finished job from memory once its final status is in the
/// registry. `unsaved` carries a final status the registry did not accept,
/// which then stays in memory so the job can still be looked up.
fn settle_job(
    jobs: &Mutex<HashMap<String, IndexStatus>>,
    job_id: &str,
    unsaved: Option<IndexStatus>,
) {
    if let Ok(mut jobs) = jobs.lock() {
        match unsaved {
            Some(status) => {
                jobs.insert(job_id.to_string(), status);
            }
            None => {
                jobs.remove(job_id);
            }
        }
    }
}

fn validate_query(query: &str) -> Result<&str, ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty".to_string()));
    }
    Ok(query)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }

    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }

    fn conflict(message: String) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", value);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{value:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
