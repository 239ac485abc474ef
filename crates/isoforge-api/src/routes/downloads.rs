//! ISO download endpoint.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::HeaderValue;
use axum::http::header::CONTENT_DISPOSITION;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use isoforge_core::JobStatus;
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};

use super::find_job;
use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/downloads/{id}", get(download_iso))
}

/// Stream the ISO of a completed build as an attachment.
async fn download_iso(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let job = find_job(&state, &id).await?;
    let path = match (job.status(), job.output_path()) {
        (JobStatus::Completed, Some(path)) => PathBuf::from(path),
        _ => return Err(ApiError::BadRequest("ISO not available for download".to_string())),
    };

    if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
        warn!(job_id = %job.id(), path = %path.display(), "ISO file missing");
        return Err(ApiError::NotFound("ISO file not found".to_string()));
    }

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.iso", job.id()));
    info!(job_id = %job.id(), file = %filename, "Serving ISO download");

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let mut response = response.map(Body::new);
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        response.headers_mut().insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use crate::routes;
    use crate::state::AppState;
    use crate::testing::{body_json, manager_with_history};
    use crate::ws::NotificationHub;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use isoforge_core::{Job, JobConfig, JobId};
    use serde_json::json;
    use tower::ServiceExt;

    fn finished(output: Option<String>, failed: bool) -> Job {
        let mut job = Job::new(JobConfig::from_value(json!({ "packages": ["base"] })).unwrap());
        job.start(Utc::now()).unwrap();
        if failed {
            job.fail("Build failed: mkarchiso exited", Utc::now()).unwrap();
        } else {
            job.complete(output, Utc::now()).unwrap();
        }
        job
    }

    async fn app_with(history: Vec<Job>) -> axum::Router {
        let manager = manager_with_history(history).await;
        let state = AppState {
            hub: NotificationHub::start(manager.clone()),
            manager,
            profile_dir: "/nonexistent".into(),
            static_dir: None,
        };
        routes::router(state)
    }

    async fn download(app: &axum::Router, id: JobId) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::get(format!("/api/downloads/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_completed_build_streams_file_as_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let iso = dir.path().join("archlinux-2024.01.01-x86_64.iso");
        std::fs::write(&iso, b"ISO-BYTES").unwrap();
        let job = finished(Some(iso.to_string_lossy().into_owned()), false);
        let app = app_with(vec![job.clone()]).await;

        let response = download(&app, job.id()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"archlinux-2024.01.01-x86_64.iso\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ISO-BYTES");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let job = finished(Some("/nonexistent/out/missing.iso".to_string()), false);
        let app = app_with(vec![job.clone()]).await;

        let response = download(&app, job.id()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "ISO file not found");
    }

    #[tokio::test]
    async fn test_failed_or_pathless_build_is_bad_request() {
        let failed = finished(None, true);
        let no_path = finished(None, false);
        let app = app_with(vec![failed.clone(), no_path.clone()]).await;

        for id in [failed.id(), no_path.id()] {
            let response = download(&app, id).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                body_json(response).await["error"],
                "ISO not available for download"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_build_is_not_found() {
        let app = app_with(Vec::new()).await;
        let response = download(&app, JobId::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Build not found");
    }
}
