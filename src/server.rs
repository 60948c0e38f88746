//! HTTP API for sessions, chunks, commits, jobs, indices, and search.
//!
//! Exposes the mutation engine over a JSON API. Typed [`Error`]s map onto
//! the standard error body:
//!
//! ```json
//! { "error": { "code": "VERSION_CONFLICT", "message": "..." } }
//! ```
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/sessions` | Create a session from extracted pages |
//! | `GET`  | `/api/sessions/{id}` | Full session state |
//! | `PUT`  | `/api/sessions/{id}/text` | Replace the full text (versioned) |
//! | `PUT`  | `/api/sessions/{id}/strategy` | Replace the chunk strategy (versioned) |
//! | `GET`  | `/api/sessions/{id}/chunks/{chunk_id}` | One chunk's span, text, metadata |
//! | `PUT`  | `/api/sessions/{id}/chunks/{chunk_id}/metadata` | Edit chunk metadata |
//! | `POST` | `/api/sessions/{id}/commit` | Start a commit job |
//! | `GET`  | `/api/jobs/{id}` | Job status |
//! | `GET`  | `/api/indices` | List indices |
//! | `GET`  | `/api/indices/resolve` | Resolve `?model=` to an index name |
//! | `DELETE` | `/api/indices/{name}` | Drop an index |
//! | `POST` | `/api/search` | Text, vector, or hybrid search |
//! | `GET`  | `/health` | Health check |
//!
//! Mutations carry the version the caller read; a stale version yields
//! `409`, marker tampering `422`, and neither changes any state.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{create_provider, embed_query};
use crate::errors::Error;
use crate::index_router::resolve_index_name;
use crate::index_store::{merge_hybrid, IndexInfo, IndexStore, SearchHit, SqliteIndexStore};
use crate::jobs::{run_commit_job, JobRecord};
use crate::models::{
    ChunkMetadata, ChunkSpan, ChunkStrategy, PageSpan, RawPage, Session,
};
use crate::session::create_session;
use crate::store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    index_store: Arc<dyn IndexStore>,
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::run_migrations(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        index_store: Arc::new(SqliteIndexStore::new(pool.clone())),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/sessions", post(handle_create_session))
        .route("/api/sessions/{id}", get(handle_get_session))
        .route("/api/sessions/{id}/text", put(handle_update_text))
        .route("/api/sessions/{id}/strategy", put(handle_update_strategy))
        .route(
            "/api/sessions/{id}/chunks/{chunk_id}",
            get(handle_get_chunk),
        )
        .route(
            "/api/sessions/{id}/chunks/{chunk_id}/metadata",
            put(handle_update_chunk_metadata),
        )
        .route("/api/sessions/{id}/commit", post(handle_commit))
        .route("/api/jobs/{id}", get(handle_get_job))
        .route("/api/indices", get(handle_list_indices))
        .route("/api/indices/resolve", get(handle_resolve_index))
        .route("/api/indices/{name}", delete(handle_delete_index))
        .route("/api/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "API server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error mapping ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::MarkerInvalid { .. } | Error::ExtractionFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::VersionConflict { .. } => StatusCode::CONFLICT,
            Error::DimensionMismatch { .. } | Error::InvalidStrategy(_) | Error::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::SessionNotFound(_)
            | Error::ChunkNotFound { .. }
            | Error::JobNotFound(_)
            | Error::IndexNotFound(_) => StatusCode::NOT_FOUND,
            Error::EmbeddingFailed(_)
            | Error::Storage(_)
            | Error::Serde(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/sessions ============

#[derive(Deserialize)]
struct CreateSessionRequest {
    doc_id: Option<String>,
    pages: Vec<RawPage>,
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<Session>, Error> {
    if request.pages.is_empty() {
        return Err(Error::Validation("no pages supplied".to_string()));
    }

    let strategy = state
        .config
        .chunking
        .to_strategy()
        .map_err(|e| Error::InvalidStrategy(e.to_string()))?;

    let meta = crate::models::ExtractMeta {
        extractor_name: "api".to_string(),
        extractor_version: env!("CARGO_PKG_VERSION").to_string(),
        page_count: request.pages.len() as u32,
        warnings: Vec::new(),
        created_at: chrono::Utc::now(),
    };

    let doc_id = request
        .doc_id
        .unwrap_or_else(|| format!("doc-{}", uuid::Uuid::new_v4()));
    let session = create_session(doc_id, request.pages, meta, strategy)?;
    store::insert_session(&state.pool, &session).await?;

    tracing::info!(session_id = %session.session_id, pages = session.base_pages.len(), "session created");
    Ok(Json(session))
}

// ============ GET /api/sessions/{id} ============

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, Error> {
    let session = store::load_session(&state.pool, &id).await?;
    Ok(Json(session))
}

// ============ PUT /api/sessions/{id}/text ============

#[derive(Deserialize)]
struct UpdateTextRequest {
    version: u64,
    current_text: String,
}

#[derive(Serialize)]
struct UpdateTextResponse {
    version: u64,
    current_text: String,
    page_spans: Vec<PageSpan>,
    chunk_spans: Vec<ChunkSpan>,
}

async fn handle_update_text(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTextRequest>,
) -> Result<Json<UpdateTextResponse>, Error> {
    let mut session = store::load_session(&state.pool, &id).await?;
    session.apply_text_edit(request.version, &request.current_text)?;
    store::save_session(&state.pool, &session).await?;

    Ok(Json(UpdateTextResponse {
        version: session.version,
        current_text: session.current_text,
        page_spans: session.page_spans,
        chunk_spans: session.chunk_spans,
    }))
}

// ============ PUT /api/sessions/{id}/strategy ============

#[derive(Deserialize)]
struct UpdateStrategyRequest {
    version: u64,
    chunk_strategy: ChunkStrategy,
}

#[derive(Serialize)]
struct UpdateStrategyResponse {
    version: u64,
    chunk_strategy: ChunkStrategy,
    page_spans: Vec<PageSpan>,
    chunk_spans: Vec<ChunkSpan>,
}

async fn handle_update_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStrategyRequest>,
) -> Result<Json<UpdateStrategyResponse>, Error> {
    let mut session = store::load_session(&state.pool, &id).await?;
    session.apply_strategy_edit(request.version, request.chunk_strategy)?;
    store::save_session(&state.pool, &session).await?;

    Ok(Json(UpdateStrategyResponse {
        version: session.version,
        chunk_strategy: session.chunk_strategy,
        page_spans: session.page_spans,
        chunk_spans: session.chunk_spans,
    }))
}

// ============ GET /api/sessions/{id}/chunks/{chunk_id} ============

#[derive(Serialize)]
struct ChunkDetailResponse {
    doc_id: String,
    session_id: String,
    chunk_id: String,
    page_no: u32,
    start: usize,
    end: usize,
    char_len: usize,
    text: String,
    hash: String,
    warnings: Vec<String>,
    metadata: ChunkMetadata,
    chunk_strategy: ChunkStrategy,
    extractor_version: String,
}

async fn handle_get_chunk(
    State(state): State<AppState>,
    Path((id, chunk_id)): Path<(String, String)>,
) -> Result<Json<ChunkDetailResponse>, Error> {
    let session = store::load_session(&state.pool, &id).await?;
    let chunk = session.chunk(&chunk_id)?.clone();

    Ok(Json(ChunkDetailResponse {
        doc_id: session.doc_id.clone(),
        session_id: session.session_id.clone(),
        text: session.chunk_text(&chunk).to_string(),
        metadata: session.metadata_for(&chunk.chunk_id),
        chunk_strategy: session.chunk_strategy.clone(),
        extractor_version: session.extract_meta.extractor_version.clone(),
        chunk_id: chunk.chunk_id,
        page_no: chunk.page_no,
        start: chunk.start,
        end: chunk.end,
        char_len: chunk.char_len,
        hash: chunk.hash,
        warnings: chunk.warnings,
    }))
}

// ============ PUT /api/sessions/{id}/chunks/{chunk_id}/metadata ============

#[derive(Serialize)]
struct ChunkMetadataResponse {
    chunk_id: String,
    metadata: ChunkMetadata,
}

async fn handle_update_chunk_metadata(
    State(state): State<AppState>,
    Path((id, chunk_id)): Path<(String, String)>,
    Json(metadata): Json<ChunkMetadata>,
) -> Result<Json<ChunkMetadataResponse>, Error> {
    let mut session = store::load_session(&state.pool, &id).await?;
    session.set_chunk_metadata(&chunk_id, metadata.clone())?;
    store::save_session_unversioned(&state.pool, &session).await?;

    Ok(Json(ChunkMetadataResponse { chunk_id, metadata }))
}

// ============ POST /api/sessions/{id}/commit ============

#[derive(Deserialize)]
struct CommitRequest {
    embedding_model: String,
    index_name: Option<String>,
}

#[derive(Serialize)]
struct CommitResponse {
    job_id: String,
}

async fn handle_commit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, Error> {
    // Verify the session exists before queueing anything.
    store::load_session(&state.pool, &id).await?;

    let job = JobRecord::new(id, request.embedding_model, request.index_name);
    store::save_job(&state.pool, &job).await?;

    let job_id = job.job_id.clone();
    let pool = state.pool.clone();
    let config = (*state.config).clone();
    let index_store = state.index_store.clone();
    tokio::spawn(run_commit_job(pool, config, index_store, job));

    Ok(Json(CommitResponse { job_id }))
}

// ============ GET /api/jobs/{id} ============

async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, Error> {
    let job = store::load_job(&state.pool, &id).await?;
    Ok(Json(job))
}

// ============ Indices ============

#[derive(Serialize)]
struct IndexListResponse {
    indices: Vec<IndexInfo>,
}

async fn handle_list_indices(
    State(state): State<AppState>,
) -> Result<Json<IndexListResponse>, Error> {
    let indices = state.index_store.list().await?;
    Ok(Json(IndexListResponse { indices }))
}

#[derive(Deserialize)]
struct ResolveQuery {
    model: String,
}

#[derive(Serialize)]
struct ResolveResponse {
    model: String,
    index_name: String,
}

async fn handle_resolve_index(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Json<ResolveResponse> {
    let index_name = resolve_index_name(&state.config.index.base_index, &query.model);
    Json(ResolveResponse {
        model: query.model,
        index_name,
    })
}

#[derive(Serialize)]
struct IndexDeleteResponse {
    index_name: String,
    deleted: bool,
}

async fn handle_delete_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<IndexDeleteResponse>, Error> {
    let deleted = state.index_store.delete(&name).await?;
    if !deleted {
        return Err(Error::IndexNotFound(name));
    }
    Ok(Json(IndexDeleteResponse {
        index_name: name,
        deleted,
    }))
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_search_mode")]
    mode: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    index_name: Option<String>,
    embedding_model: Option<String>,
}

fn default_search_mode() -> String {
    "text".to_string()
}
fn default_top_k() -> usize {
    20
}

#[derive(Serialize)]
struct SearchResponse {
    mode: String,
    index_name: String,
    top_k: usize,
    hits: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, Error> {
    if request.query.trim().is_empty() {
        return Err(Error::Validation("query must not be empty".to_string()));
    }

    let index_name = match (&request.index_name, &request.embedding_model) {
        (Some(name), _) => name.clone(),
        (None, Some(model)) => resolve_index_name(&state.config.index.base_index, model),
        (None, None) => {
            return Err(Error::Validation(
                "either index_name or embedding_model is required".to_string(),
            ))
        }
    };

    let store = state.index_store.as_ref();
    let hits = match request.mode.as_str() {
        "text" => store.search_text(&index_name, &request.query, request.top_k).await?,
        "vector" => {
            let vector = query_vector(&state, &request.query).await?;
            store
                .search_vector(&index_name, &vector, request.top_k)
                .await?
        }
        "hybrid" => {
            let vector = query_vector(&state, &request.query).await?;
            let text_hits = store
                .search_text(&index_name, &request.query, request.top_k)
                .await?;
            let vector_hits = store
                .search_vector(&index_name, &vector, request.top_k)
                .await?;
            merge_hybrid(
                text_hits,
                vector_hits,
                state.config.index.hybrid_alpha,
                request.top_k,
            )
        }
        other => {
            return Err(Error::Validation(format!(
                "unknown search mode: '{}'. Must be text, vector, or hybrid.",
                other
            )))
        }
    };

    Ok(Json(SearchResponse {
        mode: request.mode,
        index_name,
        top_k: request.top_k,
        hits,
    }))
}

async fn query_vector(state: &AppState, query: &str) -> Result<Vec<f32>, Error> {
    let provider = create_provider(&state.config.embedding)?;
    embed_query(provider.as_ref(), &state.config.embedding, query).await
}
