//! Case control HTTP server.
//!
//! Exposes case management, uploads, analysis control, progress polling,
//! findings and reports as a JSON HTTP API for a browser or desktop shell.
//! Every case-scoped request goes through the same [`Analyzer`] the CLI
//! uses, so a run started over HTTP is cancelled, polled and deleted
//! through the same job handle.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/cases` | Create a case (`{"name": ...}`) |
//! | `GET`  | `/api/cases` | List case summaries |
//! | `GET`  | `/api/cases/{id}` | Case with files and current findings |
//! | `PATCH` | `/api/cases/{id}` | Rename and/or set cloud consent |
//! | `DELETE` | `/api/cases/{id}` | Delete a case, halting any live run |
//! | `POST` | `/api/cases/{id}/files?filename=...` | Upload one file (raw body) |
//! | `GET`  | `/api/cases/{id}/files` | List uploaded files |
//! | `POST` | `/api/cases/{id}/analyze` | Start analysis (`{"reset_findings": bool, "force": bool}`) |
//! | `POST` | `/api/cases/{id}/cancel` | Cancel a live run |
//! | `GET`  | `/api/cases/{id}/progress` | Progress snapshot |
//! | `GET`  | `/api/cases/{id}/findings` | Current findings (`?all=true` for history) |
//! | `GET`  | `/api/cases/{id}/report` | Report markdown and integrity hash |
//! | `GET`  | `/api/cases/{id}/report/export` | Report artifact as a download |
//! | `POST` | `/api/reports/verify` | Verify an exported artifact (raw body) |
//! | `GET`  | `/api/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "case not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `payload_too_large` (413), `unsupported_format` (415),
//! `integrity_mismatch` (422), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a locally served
//! front end can reach the API.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use doc_analyst_core::ingest::TextExtractor;
use doc_analyst_core::models::{AnalysisProgress, Case, CaseFile, Finding, JobState, Report};
use doc_analyst_core::report::{sort_findings, verify_artifact};
use doc_analyst_core::store::CaseStore;
use doc_analyst_core::AnalysisError;

use crate::config::Config;
use crate::db;
use crate::extract::PdfExtractor;
use crate::ingest::ingest_upload;
use crate::orchestrator::{AnalyzeOptions, Analyzer, StartOutcome};
use crate::report_cmd::{export_filename, generate_report};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    pub store: Arc<dyn CaseStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub max_file_bytes: usize,
}

impl AppState {
    pub fn new(analyzer: Arc<Analyzer>, max_file_bytes: usize) -> Self {
        Self {
            store: analyzer.store().clone(),
            analyzer,
            extractor: Arc::new(PdfExtractor),
            max_file_bytes,
        }
    }
}

/// Starts the case control server.
///
/// Connects to the database, builds the [`Analyzer`] with the configured
/// inference tiers and serves on `[server].bind` until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let store: Arc<dyn CaseStore> = Arc::new(db::open_store(config).await?);
    let analyzer = Arc::new(Analyzer::from_config(config, store)?);
    let state = AppState::new(analyzer, config.ingest.max_file_bytes);

    let app = router(state);

    println!("Analyst server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = DefaultBodyLimit::max(state.max_file_bytes);

    Router::new()
        .route("/api/cases", post(handle_create_case).get(handle_list_cases))
        .route(
            "/api/cases/{id}",
            get(handle_get_case)
                .patch(handle_update_case)
                .delete(handle_delete_case),
        )
        .route(
            "/api/cases/{id}/files",
            post(handle_upload)
                .get(handle_list_files)
                .layer(upload_limit),
        )
        .route("/api/cases/{id}/analyze", post(handle_analyze))
        .route("/api/cases/{id}/cancel", post(handle_cancel))
        .route("/api/cases/{id}/progress", get(handle_progress))
        .route("/api/cases/{id}/findings", get(handle_findings))
        .route("/api/cases/{id}/report", get(handle_report))
        .route("/api/cases/{id}/report/export", get(handle_export))
        .route("/api/reports/verify", post(handle_verify))
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
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

/// Domain errors keep their code; anything else is an internal failure.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<AnalysisError>() {
            Some(domain) => domain_error(domain),
            None => {
                error!(error = %format!("{:#}", err), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message: err.to_string(),
                }
            }
        }
    }
}

fn domain_error(err: &AnalysisError) -> AppError {
    let status = match err {
        AnalysisError::CaseNotFound(_) => StatusCode::NOT_FOUND,
        AnalysisError::AnalysisInProgress(_) => StatusCode::CONFLICT,
        AnalysisError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        AnalysisError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        AnalysisError::IntegrityMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::NothingToAnalyze(_) | AnalysisError::InvalidWindowPlan(_) => {
            StatusCode::BAD_REQUEST
        }
    };
    AppError {
        status,
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 404 Not Found error for a case id.
fn case_not_found(case_id: &str) -> AppError {
    domain_error(&AnalysisError::CaseNotFound(case_id.to_string()))
}

/// Maps a body extraction failure (usually the upload size limit) onto
/// the JSON error contract.
fn body_rejection(rejection: BytesRejection) -> AppError {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError {
        status,
        code: code.to_string(),
        message: rejection.body_text(),
    }
}

async fn require_case(state: &AppState, case_id: &str) -> Result<Case, AppError> {
    state
        .store
        .get_case(case_id)
        .await?
        .ok_or_else(|| case_not_found(case_id))
}

// ============ GET /api/health ============

/// JSON response body for `GET /api/health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Cases ============

/// Request body for `POST /api/cases`.
#[derive(Deserialize)]
struct CreateCaseRequest {
    name: String,
}

/// One row of `GET /api/cases`.
#[derive(Serialize)]
struct CaseSummary {
    id: String,
    name: String,
    status: String,
    risk_level: Option<String>,
    cloud_consent: bool,
    created_at: String,
    last_run_id: Option<String>,
    file_count: usize,
    finding_count: usize,
}

impl From<&Case> for CaseSummary {
    fn from(case: &Case) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name.clone(),
            status: case.status.to_string(),
            risk_level: case.risk_level.map(|r| r.to_string()),
            cloud_consent: case.cloud_consent,
            created_at: case.created_at.clone(),
            last_run_id: case.last_run_id.clone(),
            file_count: case.files.len(),
            finding_count: case.current_findings().len(),
        }
    }
}

#[derive(Serialize)]
struct CaseListResponse {
    cases: Vec<CaseSummary>,
}

/// Full case view: files plus the findings of the latest run.
#[derive(Serialize)]
struct CaseResponse {
    #[serde(flatten)]
    summary: CaseSummary,
    files: Vec<CaseFile>,
    findings: Vec<Finding>,
}

impl From<Case> for CaseResponse {
    fn from(case: Case) -> Self {
        let mut findings = case.current_findings();
        sort_findings(&mut findings);
        Self {
            summary: CaseSummary::from(&case),
            files: case.files,
            findings,
        }
    }
}

async fn handle_create_case(
    State(state): State<AppState>,
    Json(req): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<CaseResponse>), AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let case = state.store.create_case(name).await?;
    info!(case_id = %case.id, "case created");
    Ok((StatusCode::CREATED, Json(CaseResponse::from(case))))
}

async fn handle_list_cases(
    State(state): State<AppState>,
) -> Result<Json<CaseListResponse>, AppError> {
    let cases = state.store.list_cases().await?;
    Ok(Json(CaseListResponse {
        cases: cases.iter().map(CaseSummary::from).collect(),
    }))
}

async fn handle_get_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CaseResponse>, AppError> {
    let case = require_case(&state, &id).await?;
    Ok(Json(CaseResponse::from(case)))
}

/// Request body for `PATCH /api/cases/{id}`.
#[derive(Deserialize)]
struct UpdateCaseRequest {
    name: Option<String>,
    cloud_consent: Option<bool>,
}

async fn handle_update_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCaseRequest>,
) -> Result<Json<CaseResponse>, AppError> {
    if req.name.is_none() && req.cloud_consent.is_none() {
        return Err(bad_request("expected name and/or cloud_consent"));
    }

    if let Some(name) = &req.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(bad_request("name must not be empty"));
        }
        if !state.store.rename_case(&id, name).await? {
            return Err(case_not_found(&id));
        }
    }
    if let Some(consent) = req.cloud_consent {
        if !state.store.set_cloud_consent(&id, consent).await? {
            return Err(case_not_found(&id));
        }
        info!(case_id = %id, cloud_consent = consent, "cloud consent updated");
    }

    let case = require_case(&state, &id).await?;
    Ok(Json(CaseResponse::from(case)))
}

async fn handle_delete_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.analyzer.delete_case(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(case_not_found(&id))
    }
}

// ============ Files ============

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

#[derive(Serialize)]
struct FileListResponse {
    files: Vec<CaseFile>,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UploadParams>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<CaseFile>), AppError> {
    let filename = params
        .filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    let bytes = body.map_err(body_rejection)?;

    let file = ingest_upload(
        state.store.as_ref(),
        state.extractor.clone(),
        &id,
        &filename,
        bytes.to_vec(),
        state.max_file_bytes,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

async fn handle_list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileListResponse>, AppError> {
    require_case(&state, &id).await?;
    let files = state.store.list_files(&id).await?;
    Ok(Json(FileListResponse { files }))
}

// ============ Analysis ============

/// Response body for `POST /api/cases/{id}/analyze`.
#[derive(Serialize)]
struct AnalyzeResponse {
    run_id: Option<String>,
    total: usize,
    status: JobState,
    /// `true` when the request joined a run that was already live.
    already_running: bool,
}

/// The options body is optional; an empty body means defaults.
async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<AnalyzeResponse>), AppError> {
    let options: AnalyzeOptions = if body.iter().all(u8::is_ascii_whitespace) {
        AnalyzeOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("invalid analyze options: {}", e)))?
    };

    match state.analyzer.start(&id, options).await? {
        StartOutcome::Started { run_id, total } => Ok((
            StatusCode::ACCEPTED,
            Json(AnalyzeResponse {
                run_id: Some(run_id),
                total,
                status: JobState::Analyzing,
                already_running: false,
            }),
        )),
        StartOutcome::AlreadyRunning { progress } => Ok((
            StatusCode::OK,
            Json(AnalyzeResponse {
                run_id: progress.run_id,
                total: progress.total,
                status: progress.status,
                already_running: true,
            }),
        )),
    }
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    require_case(&state, &id).await?;
    let cancelled = state.analyzer.cancel(&id).await;
    Ok(Json(CancelResponse { cancelled }))
}

async fn handle_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisProgress>, AppError> {
    match state.analyzer.snapshot(&id).await? {
        Some(progress) => Ok(Json(progress)),
        None => Err(case_not_found(&id)),
    }
}

#[derive(Deserialize)]
struct FindingsParams {
    #[serde(default)]
    all: bool,
}

#[derive(Serialize)]
struct FindingsResponse {
    case_id: String,
    run_id: Option<String>,
    findings: Vec<Finding>,
}

async fn handle_findings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<FindingsParams>,
) -> Result<Json<FindingsResponse>, AppError> {
    let case = require_case(&state, &id).await?;
    let mut findings = if params.all {
        case.findings.clone()
    } else {
        case.current_findings()
    };
    sort_findings(&mut findings);
    Ok(Json(FindingsResponse {
        case_id: case.id,
        run_id: case.last_run_id,
        findings,
    }))
}

// ============ Reports ============

async fn handle_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Report>, AppError> {
    let report = generate_report(state.store.as_ref(), &id).await?;
    Ok(Json(report))
}

async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let report = generate_report(state.store.as_ref(), &id).await?;
    let headers = [
        (
            header::CONTENT_TYPE,
            "text/markdown; charset=utf-8".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export_filename(&id)),
        ),
    ];
    Ok((headers, report.artifact()).into_response())
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
    integrity_hash: String,
}

async fn handle_verify(body: String) -> Result<Json<VerifyResponse>, AppError> {
    match verify_artifact(&body) {
        Ok(hash) => Ok(Json(VerifyResponse {
            valid: true,
            integrity_hash: hash,
        })),
        Err(e) => Err(domain_error(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_codes() {
        let err: AppError = anyhow::Error::from(AnalysisError::CaseNotFound("c1".into())).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");

        let err: AppError =
            anyhow::Error::from(AnalysisError::AnalysisInProgress("c1".into())).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "conflict");

        let err = domain_error(&AnalysisError::IntegrityMismatch {
            stored: "a".into(),
            computed: "b".into(),
        });
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "integrity_mismatch");
    }

    #[test]
    fn other_errors_are_internal() {
        let err: AppError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal");
        assert!(err.message.contains("disk on fire"));
    }
}
