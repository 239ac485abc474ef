//! Build submission and inspection endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use isoforge_core::{Job, JobConfig, JobId, JobStatus};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::find_job;
use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/build", post(submit_build))
        .route("/status", get(status))
        .route("/builds", get(list_builds))
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/log", get(get_build_log))
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    status: &'static str,
    message: &'static str,
    job_id: JobId,
    timestamp: DateTime<Utc>,
    queue_position: usize,
}

/// Queue a build. The body is the build configuration, an arbitrary
/// non-empty JSON object.
async fn submit_build(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SubmitResponse>, ApiError> {
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?
    };
    let config = JobConfig::from_value(value)?;

    let submission = state.manager.submit(config).await;
    info!(job_id = %submission.job.id(), position = submission.position, "Build accepted");

    Ok(Json(SubmitResponse {
        status: "accepted",
        message: "Build job queued",
        job_id: submission.job.id(),
        timestamp: Utc::now(),
        queue_position: submission.position,
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
    queue_size: usize,
    has_active_build: bool,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.manager.status().await;
    Json(StatusResponse {
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        queue_size: status.queue_length,
        has_active_build: status.has_active_build,
    })
}

#[derive(Debug, Serialize)]
struct BuildsResponse {
    active: Option<Job>,
    queue: Vec<Job>,
    history: Vec<Job>,
}

async fn list_builds(State(state): State<AppState>) -> Json<BuildsResponse> {
    let overview = state.manager.overview().await;
    Json(BuildsResponse {
        active: overview.active,
        queue: overview.queue,
        history: overview.history,
    })
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(find_job(&state, &id).await?))
}

#[derive(Debug, Serialize)]
struct LogResponse {
    id: JobId,
    status: JobStatus,
    log: Vec<String>,
    progress: u8,
}

async fn get_build_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LogResponse>, ApiError> {
    let job = find_job(&state, &id).await?;
    Ok(Json(LogResponse {
        id: job.id(),
        status: job.status(),
        log: job.build_log().to_vec(),
        progress: job.progress(),
    }))
}
