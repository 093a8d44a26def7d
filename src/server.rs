//! HTTP surface over the knowledge-base operations.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/kb/crawl` | Crawl seed URLs and build (or reuse) a collection |
//! | `POST` | `/kb/local` | Build (or reuse) a collection from local paths |
//! | `POST` | `/kb/query` | Ranked hits from a persisted collection |
//! | `GET`  | `/kb/collections` | List collection names |
//! | `POST` | `/admin/cleanup` | Evict old collections (needs `X-Admin-Token`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_locations", "message": "no locations to process: ..." } }
//! ```
//!
//! Codes: `bad_request`, `no_locations`, `no_documents` (400), `unauthorized`
//! (401), `not_found` (404), `index_build`, `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::KbError;
use crate::kb::{CrawlKbRequest, KnowledgeBase, LocalKbRequest};
use crate::lifecycle::EvictionReport;
use crate::models::RetrievedChunk;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
struct AppState {
    kb: Arc<KnowledgeBase>,
    /// `None` disables the admin routes entirely.
    admin_token: Option<Arc<str>>,
}

/// Build the router. Split out from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(kb: Arc<KnowledgeBase>, admin_token: Option<String>) -> Router {
    let state = AppState {
        kb,
        admin_token: admin_token.map(Arc::from),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/kb/crawl", post(handle_crawl))
        .route("/kb/local", post(handle_local))
        .route("/kb/query", post(handle_query))
        .route("/kb/collections", get(handle_collections))
        .route("/admin/cleanup", post(handle_cleanup))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(kb: Arc<KnowledgeBase>) -> anyhow::Result<()> {
    let bind_addr = kb.config().server.bind.clone();
    let admin_token = kb.config().server.resolved_admin_token();
    if admin_token.is_none() {
        info!("No admin token configured, admin routes will reject all requests");
    }
    let app = router(kb, admin_token);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        let status = match &err {
            KbError::InvalidInput(_) | KbError::NoLocations(_) | KbError::NoDocuments(_) => {
                StatusCode::BAD_REQUEST
            }
            KbError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            KbError::IndexBuild { .. } | KbError::Other(_) => {
                error!(error = %err, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "missing or invalid admin token".to_string(),
    }
}

fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state.admin_token.as_deref().ok_or_else(unauthorized)?;
    let given = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;
    if tokens_match(given, expected) {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Constant-time token comparison: both tokens key an HMAC over the same
/// message and the fixed-length tags are compared with `verify_slice`.
fn tokens_match(given: &str, expected: &str) -> bool {
    let tag = |key: &str| {
        HmacSha256::new_from_slice(key.as_bytes()).map(|mut mac| {
            mac.update(ADMIN_TOKEN_HEADER.as_bytes());
            mac
        })
    };
    let (Ok(expected), Ok(given)) = (tag(expected), tag(given)) else {
        return false;
    };
    given.verify_slice(&expected.finalize().into_bytes()).is_ok()
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

// ============ POST /kb/crawl ============

#[derive(Serialize)]
struct CrawlResponse {
    collection: String,
    urls: Vec<String>,
    chunks: usize,
}

async fn handle_crawl(
    State(state): State<AppState>,
    Json(req): Json<CrawlKbRequest>,
) -> Result<Json<CrawlResponse>, AppError> {
    let build = state.kb.crawl_and_create_kb(req).await?;
    Ok(Json(CrawlResponse {
        collection: build.collection,
        urls: build.locations,
        chunks: build.chunks,
    }))
}

// ============ POST /kb/local ============

#[derive(Serialize)]
struct LocalResponse {
    collection: String,
    files: Vec<String>,
    chunks: usize,
}

async fn handle_local(
    State(state): State<AppState>,
    Json(req): Json<LocalKbRequest>,
) -> Result<Json<LocalResponse>, AppError> {
    if req.paths.is_empty() {
        return Err(bad_request("paths must not be empty"));
    }
    let build = state.kb.create_knowledge_base(req).await?;
    Ok(Json(LocalResponse {
        collection: build.collection,
        files: build.locations,
        chunks: build.chunks,
    }))
}

// ============ POST /kb/query ============

#[derive(Deserialize)]
struct QueryRequest {
    collection: String,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    collection: String,
    hits: Vec<RetrievedChunk>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let hits = state.kb.query(&req.collection, &req.query, req.top_k).await?;
    Ok(Json(QueryResponse {
        collection: req.collection,
        hits,
    }))
}

// ============ GET /kb/collections ============

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<String>,
}

async fn handle_collections(
    State(state): State<AppState>,
) -> Result<Json<CollectionsResponse>, AppError> {
    let collections = state.kb.list_collections().await?;
    Ok(Json(CollectionsResponse { collections }))
}

// ============ POST /admin/cleanup ============

#[derive(Deserialize, Default)]
struct CleanupRequest {
    #[serde(default)]
    max_collections: Option<usize>,
}

async fn handle_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<EvictionReport>, AppError> {
    check_admin(&state, &headers)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let report = state.kb.cleanup(req.max_collections).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match_exact_only() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cre", "s3cret"));
        assert!(!tokens_match("s3cret!", "s3cret"));
        assert!(!tokens_match("S3CRET", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }
}
