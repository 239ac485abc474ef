//! Shared fixtures for API tests.

use isoforge_config::ServerConfig;
use isoforge_core::JobConfig;
use isoforge_executor::SimulatedExecutor;
use isoforge_scheduler::{QueueManager, QueueSettings};
use isoforge_store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::AppState;

pub fn job_config() -> JobConfig {
    JobConfig::from_value(json!({ "packages": ["base", "linux"] })).unwrap()
}

/// Queue manager backed by memory and a simulated executor without delays.
pub async fn test_manager() -> Arc<QueueManager> {
    let executor = SimulatedExecutor::new("/tmp/isoforge-test/out").with_step_delay(Duration::ZERO);
    let settings = QueueSettings {
        idle_poll: Duration::from_millis(20),
        ..QueueSettings::default()
    };
    QueueManager::open(Arc::new(MemoryStore::new()), Arc::new(executor), settings).await
}

pub async fn test_state(config: &ServerConfig) -> AppState {
    AppState::new(test_manager().await, config)
}

/// Queue manager that starts with the given finished jobs in its history.
pub async fn manager_with_history(history: Vec<isoforge_core::Job>) -> Arc<QueueManager> {
    let executor = SimulatedExecutor::new("/tmp/isoforge-test/out").with_step_delay(Duration::ZERO);
    let store = MemoryStore::with_jobs(Vec::new(), history);
    QueueManager::open(Arc::new(store), Arc::new(executor), QueueSettings::default()).await
}

/// Read a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
