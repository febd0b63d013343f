//! HTTP API surface.
//!
//! Thin translation layer over the orchestrator: JSON in, JSON out, error
//! kinds mapped to status codes. Responses never echo credentials; the
//! access token lives only in the request body and the remote clone
//! command.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::pipeline::clone_step::ProjectInfo;
use crate::pipeline::{CloneRequest, Orchestrator, OrchestratorError};
use crate::store::SandboxRecord;

/// Builds the application router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/clone", post(clone_repository))
        .route("/sandboxes/:id", get(get_sandbox))
        .route("/sandboxes/:id", delete(remove_sandbox))
        .route("/sandboxes/:id/touch", post(touch_sandbox))
        .with_state(orchestrator)
}

/// Binds and serves until the process is stopped.
pub async fn serve(orchestrator: Arc<Orchestrator>, port: u16) -> anyhow::Result<()> {
    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloneBody {
    git_url: String,
    branch: Option<String>,
    project_name: String,
    description: Option<String>,
    #[serde(default)]
    is_private: bool,
    access_token: Option<String>,
    sandbox_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloneResponse {
    success: bool,
    sandbox_id: String,
    project_name: String,
    project_info: ProjectInfo,
    server_url: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordResponse {
    sandbox_id: String,
    name: String,
    status: String,
    url: Option<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    last_active_at: chrono::DateTime<chrono::Utc>,
    auto_stop_at: chrono::DateTime<chrono::Utc>,
}

impl From<SandboxRecord> for RecordResponse {
    fn from(record: SandboxRecord) -> Self {
        Self {
            sandbox_id: record.sandbox_id,
            name: record.name,
            status: record.status.to_string(),
            url: record.url,
            started_at: record.started_at,
            last_active_at: record.last_active_at,
            auto_stop_at: record.auto_stop_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::Validation(_) | OrchestratorError::CloneFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            OrchestratorError::Busy { .. } => StatusCode::CONFLICT,
            OrchestratorError::Store(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            OrchestratorError::Provision(_) | OrchestratorError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse {
            success: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Caller identity for record ownership. Single-user deployments omit the
/// header and share one owner.
fn owner_id(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn clone_repository(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(body): Json<CloneBody>,
) -> Result<Json<CloneResponse>, ApiError> {
    let owner = owner_id(&headers);
    let request = CloneRequest {
        git_url: body.git_url,
        branch: body.branch,
        project_name: body.project_name,
        description: body.description,
        is_private: body.is_private,
        access_token: body.access_token,
        sandbox_id: body.sandbox_id,
    };

    let outcome = orchestrator.clone_and_start(&owner, request).await?;
    Ok(Json(CloneResponse {
        success: true,
        sandbox_id: outcome.sandbox_id,
        project_name: outcome.project_name,
        project_info: outcome.project_info,
        server_url: outcome.server_url,
        message: outcome.message,
    }))
}

async fn get_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<RecordResponse>, ApiError> {
    let record = orchestrator.get(&id).await?;
    Ok(Json(record.into()))
}

async fn touch_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<RecordResponse>, ApiError> {
    let record = orchestrator.touch(&id).await?;
    Ok(Json(record.into()))
}

async fn remove_sandbox(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    orchestrator.remove(&id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Sandbox {id} stopped and removed"),
    })))
}
