//! HTTP surface for Dataforge.
//!
//! A compact Axum router over the project store and pipeline runner:
//!
//! - `GET /` – health probe.
//! - `GET|POST /projects`, `DELETE /projects/:name` – project management.
//! - `POST /projects/:name/upload` – store raw text (JSON body).
//! - `POST /projects/:name/run|stop|resume` – pipeline control; run/resume
//!   return 202 immediately, failures surface via the polled status.
//! - `GET /projects/:name/status` – fresh status snapshot, never cached.
//! - `GET /projects/:name/data/{cleaned,chunks,qa}` – read-only previews.
//! - `POST /projects/:name/export` – render a JSONL export.
//! - `GET /metrics` – run counters.
//! - `GET|PUT /prompt` – active QA prompt template.

use crate::export::{self, ExportError};
use crate::generation::PromptTemplate;
use crate::llm::GenerationConfig;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{PipelineError, PipelineRunner};
use crate::processing::PipelineSettings;
use crate::project::{ProjectStatus, StoreError};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the pipeline API surface.
pub fn create_router(runner: Arc<PipelineRunner>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:name", delete(delete_project))
        .route("/projects/:name/status", get(project_status))
        .route("/projects/:name/upload", post(upload_text))
        .route("/projects/:name/run", post(run_pipeline))
        .route("/projects/:name/stop", post(stop_pipeline))
        .route("/projects/:name/resume", post(resume_pipeline))
        .route("/projects/:name/data/cleaned", get(data_cleaned))
        .route("/projects/:name/data/chunks", get(data_chunks))
        .route("/projects/:name/data/qa", get(data_qa))
        .route("/projects/:name/export", post(export_dataset))
        .route("/metrics", get(get_metrics))
        .route("/prompt", get(get_prompt).put(update_prompt))
        .with_state(runner)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "dataforge" }))
}

// projects

async fn list_projects(
    State(runner): State<Arc<PipelineRunner>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(runner.store().list_projects()?))
}

/// Request body for `POST /projects`.
#[derive(Deserialize)]
struct CreateProjectRequest {
    name: String,
}

async fn create_project(
    State(runner): State<Arc<PipelineRunner>>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let path = runner.store().create_project(&request.name)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("Project {} created", request.name),
            "path": path.display().to_string(),
        })),
    ))
}

async fn delete_project(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    runner.store().delete_project(&name)?;
    Ok(Json(json!({ "message": format!("Project {name} deleted") })))
}

async fn project_status(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
) -> Result<Json<ProjectStatus>, AppError> {
    Ok(Json(runner.store().status(&name)?))
}

/// Request body for `POST /projects/:name/upload`.
#[derive(Deserialize)]
struct UploadRequest {
    text: String,
}

async fn upload_text(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    runner.store().save_raw_text(&name, &request.text)?;
    Ok(Json(json!({ "message": "Text uploaded successfully" })))
}

// pipeline control

/// Request body for `POST /projects/:name/run`.
#[derive(Deserialize)]
struct RunRequest {
    #[serde(default)]
    pipeline_config: PipelineSettings,
    generation_config: GenerationConfig,
}

async fn run_pipeline(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    runner.start_run(&name, request.pipeline_config, request.generation_config)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Pipeline started in background" })),
    ))
}

async fn stop_pipeline(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    runner.stop_run(&name)?;
    Ok(Json(
        json!({ "message": "Stop requested; run will pause at the next chunk boundary" }),
    ))
}

/// Request body for `POST /projects/:name/resume`.
#[derive(Deserialize)]
struct ResumeRequest {
    generation_config: GenerationConfig,
}

async fn resume_pipeline(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    runner.resume_run(&name, request.generation_config)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Pipeline resumed in background" })),
    ))
}

// read-only previews

async fn data_cleaned(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cleaned = runner.store().load_cleaned_text(&name)?;
    let raw_length = runner.store().load_raw_text(&name).map(|t| t.len()).ok();
    Ok(Json(json!({
        "cleaned_text": cleaned,
        "cleaned_length": cleaned.len(),
        "raw_length": raw_length,
    })))
}

async fn data_chunks(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let chunks = runner.store().load_chunks(&name)?;
    Ok(Json(json!({ "count": chunks.len(), "chunks": chunks })))
}

async fn data_qa(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let pairs = runner.store().load_qa_pairs(&name)?;
    Ok(Json(json!({ "count": pairs.len(), "qa_pairs": pairs })))
}

// export

/// Request body for `POST /projects/:name/export`.
#[derive(Deserialize)]
struct ExportRequest {
    #[serde(default = "default_export_format")]
    format: String,
}

fn default_export_format() -> String {
    "alpaca".to_string()
}

async fn export_dataset(
    State(runner): State<Arc<PipelineRunner>>,
    Path(name): Path<String>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let path = export::export_dataset(runner.store(), &name, &request.format)?;
    Ok(Json(json!({
        "message": "Export written",
        "path": path.display().to_string(),
        "format": request.format,
    })))
}

// metrics and prompt

async fn get_metrics(State(runner): State<Arc<PipelineRunner>>) -> Json<MetricsSnapshot> {
    Json(runner.metrics().snapshot())
}

/// Response/request body for the prompt endpoints.
#[derive(Serialize, Deserialize)]
struct PromptBody {
    prompt: String,
}

async fn get_prompt(State(runner): State<Arc<PipelineRunner>>) -> Json<PromptBody> {
    let template = PromptTemplate::load_or_default(runner.store().root());
    Json(PromptBody {
        prompt: template.text().to_string(),
    })
}

async fn update_prompt(
    State(runner): State<Arc<PipelineRunner>>,
    Json(body): Json<PromptBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    PromptTemplate::save(runner.store().root(), &body.prompt)
        .map_err(|error| AppError(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?;
    Ok(Json(json!({ "message": "Prompt updated successfully" })))
}

// error mapping

struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(inner: StoreError) -> Self {
        let status = match &inner {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            StoreError::InvalidName(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, inner.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        let status = match &inner {
            PipelineError::Conflict(_)
            | PipelineError::NotRunning(_)
            | PipelineError::State(_) => StatusCode::CONFLICT,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::NotResumable(_) => StatusCode::BAD_REQUEST,
            PipelineError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            PipelineError::Store(StoreError::AlreadyExists(_)) => StatusCode::CONFLICT,
            PipelineError::Store(StoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, inner.to_string())
    }
}

impl From<ExportError> for AppError {
    fn from(inner: ExportError) -> Self {
        let status = match &inner {
            ExportError::UnknownFormat(_) => StatusCode::BAD_REQUEST,
            ExportError::NoData(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, inner.to_string())
    }
}
