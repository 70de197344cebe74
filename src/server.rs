//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search` | Keyword search (parameters in [`crate::search`]) |
//! | `GET`  | `/suggest?q=&size=` | Term label completion |
//! | `GET`  | `/documents/{id}` | One indexed document, without its text |
//! | `GET`  | `/health` | Index store reachability and version |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: 1234" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error`
//! (502), `timeout` (504), `internal` (500). Messages are kept short; the
//! full error is logged.
//!
//! A search without keywords is not an error: it answers `200 {}`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the search page can
//! be served from anywhere.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::get::{get_document, DocumentResponse};
use crate::index_client::IndexClient;
use crate::search::{parse_params, Searcher, Suggestion};
use crate::sparql::SparqlClient;
use crate::synonyms::SynonymResolver;

const DEFAULT_SUGGEST_SIZE: usize = 10;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub searcher: Searcher,
    pub index: IndexClient,
    pub documents_index: String,
    pub health_timeout: Duration,
}

impl AppState {
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let index = IndexClient::from_config(&config.search)?;
        let synonyms = SynonymResolver::new(SparqlClient::from_config(&config.graph)?);
        Ok(Self {
            searcher: Searcher::new(index.clone(), &config.search, Some(synonyms)),
            index,
            documents_index: config.search.documents_index.clone(),
            health_timeout: Duration::from_secs(config.search.health_timeout_secs),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/suggest", get(handle_suggest))
        .route("/documents/{id}", get(handle_document))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "HTTP server listening");
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
    code: &'static str,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        tracing::error!(error = %err, "request failed");
        if err.is_timeout() {
            return AppError {
                status: StatusCode::GATEWAY_TIMEOUT,
                code: "timeout",
                message: "upstream service timed out".to_string(),
            };
        }
        match err {
            Error::NotFound { kind, id } => not_found(format!("{} not found: {}", kind, id)),
            Error::Upstream { service, .. } => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upstream_error",
                message: format!("{} request failed", service),
            },
            Error::Validation { context, .. } => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upstream_error",
                message: format!("unexpected {} response", context),
            },
            _ => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: "internal error".to_string(),
            },
        }
    }
}

// ============ GET /search ============

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let Some(opts) = parse_params(&params) else {
        return Ok(Json(json!({})));
    };
    Ok(Json(state.searcher.search(opts).await?))
}

// ============ GET /suggest ============

#[derive(Deserialize)]
struct SuggestParams {
    q: Option<String>,
    size: Option<usize>,
}

#[derive(Serialize)]
struct SuggestResponse {
    suggestions: Vec<Suggestion>,
}

async fn handle_suggest(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<SuggestResponse>, AppError> {
    let prefix = params.q.unwrap_or_default();
    if prefix.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let size = params.size.unwrap_or(DEFAULT_SUGGEST_SIZE).max(1);
    let suggestions = state.searcher.suggest(&prefix, size).await?;
    Ok(Json(SuggestResponse { suggestions }))
}

// ============ GET /documents/{id} ============

async fn handle_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    get_document(&state.index, &state.documents_index, &id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"` when the index store answers, `"degraded"` otherwise.
    status: &'static str,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = match state.index.ping(state.health_timeout).await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "index store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
