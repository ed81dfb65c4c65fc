//! JSON HTTP API over the integrity engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Commit a new document (raw body, `?name=`) |
//! | `GET`  | `/documents/{id}` | Serve current content, fail-closed |
//! | `POST` | `/documents/{id}/versions` | Commit a new version (raw body) |
//! | `GET`  | `/documents/{id}/versions` | Version ledger, newest first |
//! | `POST` | `/documents/{id}/versions/{n}/restore` | Copy version `n` forward |
//! | `POST` | `/recovery/scan` | Sweep all documents, enqueue the broken ones |
//! | `POST` | `/recovery/retry-queue/process` | Run due retry-queue items |
//! | `POST` | `/recovery/{id}` | Recover one document now |
//! | `GET`  | `/health/report` | Fleet health snapshot |
//! | `GET`  | `/health/report/export` | Health snapshot as CSV |
//! | `GET`  | `/health/report/{id}` | One document's health and event trail |
//! | `GET`  | `/health` | Liveness check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "checksum_mismatch", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `checksum_mismatch`
//! (409), `already_in_flight` (409), `abandoned` (410), `storage_unavailable`
//! (503), `storage_timeout` (504), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::EngineError;
use crate::gateway::Gateway;
use crate::{db, documents, recovery, report, versions};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    gateway: Arc<Gateway>,
}

/// Starts the HTTP server on `[server].bind` and serves until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let gateway = Gateway::from_config(config)?;
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        gateway,
    };

    spawn_retry_sweep(&state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/documents", post(handle_commit_document))
        .route("/documents/{id}", get(handle_get_document))
        .route(
            "/documents/{id}/versions",
            get(handle_list_versions).post(handle_commit_version),
        )
        .route(
            "/documents/{id}/versions/{n}/restore",
            post(handle_restore_version),
        )
        .route("/recovery/scan", post(handle_scan))
        .route("/recovery/retry-queue/process", post(handle_process_queue))
        .route("/recovery/{id}", post(handle_recover))
        .route("/health/report", get(handle_health_report))
        .route("/health/report/export", get(handle_health_export))
        .route("/health/report/{id}", get(handle_document_report))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("docvault server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Recurring retry-queue sweep. Cooperative: one pass per tick, bounded by
/// `recovery.concurrency`, skipped entirely when `sweep_interval_secs` is 0.
fn spawn_retry_sweep(state: &AppState) {
    let interval_secs = state.config.recovery.sweep_interval_secs;
    if interval_secs == 0 {
        return;
    }
    let pool = state.pool.clone();
    let gateway = Arc::clone(&state.gateway);
    let recovery_config = state.config.recovery.clone();

    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;
            match recovery::process_retry_queue(&pool, &gateway, &recovery_config).await {
                Ok(outcome) if outcome.processed > 0 => {
                    println!(
                        "retry sweep: {} processed, {} succeeded, {} abandoned",
                        outcome.processed, outcome.succeeded, outcome.abandoned
                    );
                }
                Ok(_) => {}
                Err(e) => eprintln!("warning: retry-queue sweep failed: {}", e),
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"checksum_mismatch"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps engine errors onto the HTTP error contract. The status encodes
/// the failure class so callers can branch without parsing messages.
fn engine_error(err: EngineError) -> AppError {
    let status = match &err {
        EngineError::NotFound => StatusCode::NOT_FOUND,
        EngineError::ChecksumMismatch { .. } => StatusCode::CONFLICT,
        EngineError::AlreadyInFlight => StatusCode::CONFLICT,
        EngineError::Abandoned => StatusCode::GONE,
        EngineError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::StorageTimeout => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Metadata(_) | EngineError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError {
        status,
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Liveness check used by load balancers; does not touch storage.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct CommitParams {
    name: Option<String>,
    actor: Option<String>,
    notes: Option<String>,
}

#[derive(Serialize)]
struct CommitResponse {
    document_id: String,
    version: i64,
    checksum: String,
}

/// `POST /documents` — raw request body becomes version 1 of a new
/// document. `?name=` is required.
async fn handle_commit_document(
    State(state): State<AppState>,
    Query(params): Query<CommitParams>,
    body: Bytes,
) -> Result<Json<CommitResponse>, AppError> {
    let name = params
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| bad_request("query parameter 'name' is required"))?;
    if body.is_empty() {
        return Err(bad_request("request body must not be empty"));
    }

    let outcome = versions::commit_new_document(
        &state.pool,
        &state.gateway,
        &name,
        &body,
        params.actor.as_deref(),
        params.notes.as_deref(),
    )
    .await
    .map_err(engine_error)?;

    Ok(Json(CommitResponse {
        document_id: outcome.document_id,
        version: outcome.version,
        checksum: outcome.checksum,
    }))
}

/// `GET /documents/{id}` — current content, digest-audited. Corrupt
/// content is never served; the caller gets a 409 and the mismatch lands
/// in the audit log.
async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let doc = documents::get_document(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no document with id: {}", id)))?;

    let bytes = state
        .gateway
        .fetch(&state.pool, &doc)
        .await
        .map_err(engine_error)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::ETAG, format!("\"{}\"", doc.checksum)),
        ],
        bytes,
    )
        .into_response())
}

async fn handle_commit_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CommitParams>,
    body: Bytes,
) -> Result<Json<CommitResponse>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must not be empty"));
    }

    let outcome = versions::create_version(
        &state.pool,
        &state.gateway,
        &id,
        &body,
        params.actor.as_deref(),
        params.notes.as_deref(),
    )
    .await
    .map_err(engine_error)?;

    Ok(Json(CommitResponse {
        document_id: outcome.document_id,
        version: outcome.version,
        checksum: outcome.checksum,
    }))
}

#[derive(Serialize)]
struct VersionInfo {
    version_number: i64,
    checksum: String,
    created_by: Option<String>,
    notes: Option<String>,
    created_at: i64,
}

#[derive(Serialize)]
struct VersionListResponse {
    document_id: String,
    current_version: i64,
    versions: Vec<VersionInfo>,
}

async fn handle_list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VersionListResponse>, AppError> {
    let doc = documents::get_document(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no document with id: {}", id)))?;

    let versions = versions::history(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .into_iter()
        .map(|v| VersionInfo {
            version_number: v.version_number,
            checksum: v.checksum,
            created_by: v.created_by,
            notes: v.notes,
            created_at: v.created_at,
        })
        .collect();

    Ok(Json(VersionListResponse {
        document_id: doc.id,
        current_version: doc.current_version,
        versions,
    }))
}

#[derive(Serialize)]
struct RestoreResponse {
    document_id: String,
    restored_from: i64,
    new_version: i64,
}

async fn handle_restore_version(
    State(state): State<AppState>,
    Path((id, n)): Path<(String, i64)>,
    Query(params): Query<CommitParams>,
) -> Result<Json<RestoreResponse>, AppError> {
    let new_version = versions::restore(
        &state.pool,
        &state.gateway,
        &id,
        n,
        params.actor.as_deref(),
        params.notes.as_deref(),
    )
    .await
    .map_err(engine_error)?;

    Ok(Json(RestoreResponse {
        document_id: id,
        restored_from: n,
        new_version,
    }))
}

// ============ Recovery ============

#[derive(Serialize)]
struct ScanResponse {
    scanned: u64,
    missing: u64,
    mismatched: u64,
    enqueued: u64,
}

async fn handle_scan(State(state): State<AppState>) -> Result<Json<ScanResponse>, AppError> {
    let outcome = recovery::scan(
        &state.pool,
        &state.gateway,
        state.config.recovery.concurrency,
    )
    .await
    .map_err(|e| internal(e.to_string()))?;

    Ok(Json(ScanResponse {
        scanned: outcome.scanned,
        missing: outcome.missing,
        mismatched: outcome.mismatched,
        enqueued: outcome.enqueued,
    }))
}

#[derive(Serialize)]
struct RecoverResponse {
    document_id: String,
    method: &'static str,
    version: i64,
    new_version: Option<i64>,
}

async fn handle_recover(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecoverResponse>, AppError> {
    let outcome = recovery::recover_one(&state.pool, &state.gateway, &id)
        .await
        .map_err(engine_error)?;

    Ok(Json(RecoverResponse {
        document_id: id,
        method: outcome.method,
        version: outcome.version,
        new_version: outcome.new_version,
    }))
}

#[derive(Serialize)]
struct QueueResponse {
    processed: u64,
    succeeded: u64,
    failed: u64,
    abandoned: u64,
    rescheduled: u64,
}

async fn handle_process_queue(
    State(state): State<AppState>,
) -> Result<Json<QueueResponse>, AppError> {
    let outcome =
        recovery::process_retry_queue(&state.pool, &state.gateway, &state.config.recovery)
            .await
            .map_err(|e| internal(e.to_string()))?;

    Ok(Json(QueueResponse {
        processed: outcome.processed,
        succeeded: outcome.succeeded,
        failed: outcome.failed,
        abandoned: outcome.abandoned,
        rescheduled: outcome.rescheduled,
    }))
}

// ============ Health reports ============

async fn handle_health_report(
    State(state): State<AppState>,
) -> Result<Json<report::HealthReport>, AppError> {
    let snapshot = report::health_report(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(snapshot))
}

async fn handle_health_export(State(state): State<AppState>) -> Result<Response, AppError> {
    let snapshot = report::health_report(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    let csv = report::export_csv(&snapshot);
    Ok((
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    )
        .into_response())
}

async fn handle_document_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<report::DocumentReport>, AppError> {
    let doc_report = report::document_report(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no document with id: {}", id)))?;
    Ok(Json(doc_report))
}
