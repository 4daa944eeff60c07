// src/server.rs
use axum::http::StatusCode as AxumStatusCode;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::ingest::{clear_ledger, ensure_ledger, upsert_records, IngestRequest, ViewRefresher};
use crate::store::{write_workbook_json, StoreError, WorkbookFile};

pub const REFRESH_HOOK_MISSING: &str = "refresh hook not configured";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Timed out waiting for the workbook lock after {0:?}")]
    LockTimeout(Duration),
    #[error("Request body is not valid JSON: {0}")]
    BadRequest(#[from] serde_json::Error),
    #[error("Workbook error: {0}")]
    Store(#[from] StoreError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Error occurred: {}", self);
        let status_code = match &self {
            AppError::LockTimeout(_) => AxumStatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_) => AxumStatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Task(_) => AxumStatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status_code,
            Json(ErrorBody {
                ok: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// --- Shared Application State ---

/// Ingestion state. The workbook mutex is the process-wide write lock; every
/// upsert, clear and refresh runs while holding it. File writes go to the
/// blocking pool (see `persist`) so the runtime threads never do disk I/O.
#[derive(Clone)]
pub struct AppState {
    workbook: Arc<Mutex<WorkbookFile>>,
    refresher: Option<Arc<dyn ViewRefresher>>,
    raw_table: String,
    lock_timeout: Duration,
}

impl AppState {
    pub fn new(
        workbook: WorkbookFile,
        refresher: Option<Arc<dyn ViewRefresher>>,
        raw_table: impl Into<String>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            workbook: Arc::new(Mutex::new(workbook)),
            refresher,
            raw_table: raw_table.into(),
            lock_timeout,
        }
    }

    pub fn workbook(&self) -> Arc<Mutex<WorkbookFile>> {
        self.workbook.clone()
    }

    async fn lock(&self) -> Result<MutexGuard<'_, WorkbookFile>, AppError> {
        tokio::time::timeout(self.lock_timeout, self.workbook.lock())
            .await
            .map_err(|_| AppError::LockTimeout(self.lock_timeout))
    }

    /// Runs the refresh hook, if any. Returns `(refreshed, refresh_error)`.
    fn refresh(&self, workbook: &mut WorkbookFile) -> (bool, Option<String>) {
        let Some(refresher) = &self.refresher else {
            warn!("Ledger changed but no refresh hook is configured");
            return (false, Some(REFRESH_HOOK_MISSING.to_string()));
        };
        match refresher.refresh_views(workbook.workbook_mut(), Utc::now()) {
            Ok(report) => {
                info!(
                    "Views refreshed for {} / {} ({} tables)",
                    report.current,
                    report.previous,
                    report.tables.len()
                );
                (true, None)
            }
            Err(e) => {
                error!("View refresh failed: {}", e);
                (false, Some(e.to_string()))
            }
        }
    }
}

/// Serializes under the lock, then writes the file on the blocking pool.
async fn persist(workbook: &WorkbookFile) -> Result<(), AppError> {
    let json = workbook.to_json()?;
    let path = workbook.path().to_path_buf();
    tokio::task::spawn_blocking(move || write_workbook_json(&path, &json)).await??;
    Ok(())
}

// --- Responses ---

#[derive(Debug, Serialize)]
pub struct UpsertResponse {
    pub ok: bool,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub ok: bool,
    pub op: &'static str,
    pub cleared_rows: usize,
    pub refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
}

// --- Router & Handlers ---

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_health).post(handle_ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let mut workbook = state.lock().await?;
    ensure_ledger(workbook.workbook_mut(), &state.raw_table)?;
    persist(&workbook).await?;
    Ok(Json(HealthResponse { ok: true }))
}

async fn handle_ingest(State(state): State<AppState>, body: String) -> Result<Response, AppError> {
    let payload: serde_json::Value = if body.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&body)?
    };
    let request = IngestRequest::from_json(&payload);

    let mut workbook = state.lock().await?;
    let response = match request {
        IngestRequest::Clear => {
            info!("Handling clear request");
            let cleared_rows = clear_ledger(workbook.workbook_mut(), &state.raw_table)?;
            persist(&workbook).await?;
            let (refreshed, refresh_error) = state.refresh(&mut workbook);
            persist(&workbook).await?;
            Json(ClearResponse {
                ok: refreshed,
                op: "clear",
                cleared_rows,
                refreshed,
                refresh_error,
            })
            .into_response()
        }
        IngestRequest::Upsert(records) => {
            info!("Handling upsert of {} records", records.len());
            let outcome = upsert_records(
                workbook.workbook_mut(),
                &state.raw_table,
                &records,
                Utc::now(),
            )?;
            persist(&workbook).await?;
            let (refreshed, refresh_error) = state.refresh(&mut workbook);
            persist(&workbook).await?;
            Json(UpsertResponse {
                ok: refreshed,
                inserted: outcome.inserted,
                updated: outcome.updated,
                skipped: outcome.skipped,
                refreshed,
                refresh_error,
            })
            .into_response()
        }
    };
    Ok(response)
}
