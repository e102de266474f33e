//! HTTP API for the retrieval pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/jurisdictions` | State, county, and city names in the knowledge base |
//! | `POST` | `/documents` | Documents filed under a jurisdiction |
//! | `POST` | `/context` | Assembled reference context for a plan review |
//! | `POST` | `/search` | Semantic search over the knowledge base index |
//! | `POST` | `/analyze` | Context assembly plus plan conflict analysis |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `timeout` (408), `store_unavailable` (503), `analysis_failed` (502),
//! `internal` (500).
//!
//! Every request runs under `[server].request_timeout_secs`. On timeout the
//! handler future is dropped, which abandons any in-flight store reads.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser upload
//! form can call the API directly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::analysis::{check_plan, create_analyzer, CheckError, ConflictAnalyzer};
use crate::assemble::{AssembleError, ContextAssembler};
use crate::config::Config;
use crate::index::SemanticIndex;
use crate::models::{Conflict, JurisdictionFilter, JurisdictionOptions, JurisdictionPath, ListedDocument, ScoredChunk};
use crate::store::open_store;

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub assembler: Arc<ContextAssembler>,
    pub index: Arc<SemanticIndex>,
    pub analyzer: Arc<dyn ConflictAnalyzer>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Builds the store, assembler, index, and analyzer named by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = open_store(config)?;
        Ok(Self {
            assembler: Arc::new(ContextAssembler::new(store, config)),
            index: Arc::new(SemanticIndex::new(&config.index, &config.embedding)),
            analyzer: Arc::from(create_analyzer(&config.analysis)?),
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        })
    }
}

/// The API router with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/jurisdictions", get(handle_jurisdictions))
        .route("/documents", post(handle_documents))
        .route("/context", post(handle_context))
        .route("/search", post(handle_search))
        .route("/analyze", post(handle_analyze))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "planpath server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<AssembleError> for AppError {
    fn from(err: AssembleError) -> Self {
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
    }
}

impl From<CheckError> for AppError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Context(e) => e.into(),
            CheckError::Analysis(e) => AppError::new(
                StatusCode::BAD_GATEWAY,
                "analysis_failed",
                format!("Plan analysis failed: {:#}", e),
            ),
        }
    }
}

/// Runs `fut` under the request timeout, mapping expiry to 408.
async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::new(
            StatusCode::REQUEST_TIMEOUT,
            "timeout",
            format!("request timed out after {}s", limit.as_secs()),
        )),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    time: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        time: chrono::Utc::now().to_rfc3339(),
    })
}

// ============ GET /jurisdictions ============

async fn handle_jurisdictions(
    State(state): State<AppState>,
) -> Result<Json<JurisdictionOptions>, AppError> {
    let assembler = state.assembler.clone();
    with_timeout(state.request_timeout, async move {
        Ok(Json(assembler.list_jurisdiction_options().await))
    })
    .await
}

// ============ POST /documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<ListedDocument>,
}

async fn handle_documents(
    State(state): State<AppState>,
    Json(jurisdiction): Json<JurisdictionPath>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let assembler = state.assembler.clone();
    with_timeout(state.request_timeout, async move {
        let documents = assembler.list_documents(&jurisdiction).await;
        Ok(Json(DocumentsResponse { documents }))
    })
    .await
}

// ============ POST /context ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextRequest {
    #[serde(default)]
    jurisdiction: JurisdictionPath,
    building_type: String,
    #[serde(default)]
    document_path: Option<String>,
}

#[derive(Serialize)]
struct ContextResponse {
    context: String,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    let assembler = state.assembler.clone();
    with_timeout(state.request_timeout, async move {
        let context = assembler
            .assemble_context(&req.jurisdiction, &req.building_type, req.document_path.as_deref())
            .await?;
        Ok(Json(ContextResponse { context }))
    })
    .await
}

// ============ POST /search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    jurisdiction: Option<JurisdictionFilter>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ScoredChunk>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let index = state.index.clone();
    with_timeout(state.request_timeout, async move {
        let top_k = req.top_k.unwrap_or_else(|| index.default_top_k());
        let results = index
            .search(&req.query, top_k, req.jurisdiction.as_ref())
            .await
            .map_err(|e| {
                let message = format!("{:#}", e);
                if message.contains("disabled") {
                    AppError::new(StatusCode::BAD_REQUEST, "embeddings_disabled", message)
                } else {
                    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
                }
            })?;
        Ok(Json(SearchResponse { results }))
    })
    .await
}

// ============ POST /analyze ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    image_base64: String,
    #[serde(default = "default_media_type")]
    media_type: String,
    #[serde(default)]
    jurisdiction: JurisdictionPath,
    building_type: String,
    #[serde(default)]
    document_path: Option<String>,
}

fn default_media_type() -> String {
    "image/png".to_string()
}

#[derive(Serialize)]
struct AnalyzeResponse {
    conflicts: Vec<Conflict>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let image = base64::engine::general_purpose::STANDARD
        .decode(req.image_base64.trim())
        .map_err(|e| bad_request(format!("imageBase64 is not valid base64: {}", e)))?;
    if image.is_empty() {
        return Err(bad_request("imageBase64 must not be empty"));
    }

    let assembler = state.assembler.clone();
    let analyzer = state.analyzer.clone();
    with_timeout(state.request_timeout, async move {
        let conflicts = check_plan(
            &assembler,
            analyzer.as_ref(),
            &image,
            &req.media_type,
            &req.jurisdiction,
            &req.building_type,
            req.document_path.as_deref(),
        )
        .await?;
        Ok(Json(AnalyzeResponse { conflicts }))
    })
    .await
}
