//! HTTP control surface for the sync engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/import/articles?reset=<bool>` | Start a sync in the background (`202`), or `409` if one is running |
//! | `GET`  | `/import/status` | Current [`SyncRunSnapshot`] |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "a knowledge-base sync is already running" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard
//! can poll the status endpoint.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::ConcurrentSyncError;
use crate::ingest::{Importer, SyncOptions};
use crate::progress::LogProgress;
use crate::run_state::SyncRunSnapshot;

#[derive(Clone)]
struct AppState {
    importer: Arc<Importer>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(importer: Arc<Importer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/import/articles", post(handle_start_import))
        .route("/import/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { importer })
}

/// Serve until the process is stopped.
pub async fn run_server(config: &Config, importer: Arc<Importer>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(importer);

    println!("kb-sync server listening on http://{}", bind_addr);
    info!(%bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

impl From<ConcurrentSyncError> for AppError {
    fn from(err: ConcurrentSyncError) -> Self {
        AppError {
            status: StatusCode::CONFLICT,
            code: "conflict".to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Handlers ============

#[derive(Debug, Default, Deserialize)]
struct ImportParams {
    #[serde(default)]
    reset: bool,
}

async fn handle_start_import(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
) -> Result<(StatusCode, Json<SyncRunSnapshot>), AppError> {
    let snapshot = state
        .importer
        .start_background(SyncOptions { reset: params.reset }, Arc::new(LogProgress))?;
    info!(reset = params.reset, "sync accepted");
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn handle_status(State(state): State<AppState>) -> Json<SyncRunSnapshot> {
    Json(state.importer.status())
}

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
