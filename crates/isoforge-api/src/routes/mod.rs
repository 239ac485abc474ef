//! API routes.

pub mod builds;
pub mod downloads;
pub mod health;
pub mod profile;

use crate::AppState;
use crate::error::ApiError;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;
use isoforge_core::{Job, JobId};
use tower_http::services::{ServeDir, ServeFile};

/// Build the main router.
///
/// With a static directory configured, unmatched paths fall back to the
/// frontend bundle and finally to its `index.html`.
pub fn router(state: AppState) -> Router {
    let static_dir = state.static_dir.clone();
    let router = Router::new()
        .nest("/api", api_router())
        .route("/ws", get(ws_handler))
        .merge(health::router())
        .with_state(state);

    match static_dir {
        Some(dir) => {
            let index = dir.join("index.html");
            router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
        }
        None => router,
    }
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(builds::router())
        .merge(downloads::router())
        .merge(profile::router())
}

/// Look up a job by the id in a request path. Ids that are not UUIDs are
/// reported the same way as unknown ids.
pub(crate) async fn find_job(state: &AppState, raw_id: &str) -> Result<Job, ApiError> {
    let not_found = || ApiError::NotFound("Build not found".to_string());
    let id: JobId = raw_id.parse().map_err(|_| not_found())?;
    state.manager.get(id).await.ok_or_else(not_found)
}
