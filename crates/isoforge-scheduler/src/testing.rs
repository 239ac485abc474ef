//! Test doubles for the scheduler.

use async_trait::async_trait;
use isoforge_core::executor::{BuildEvents, BuildEventsExt, BuildExecutor, BuildOutput, BuildRequest};
use isoforge_core::{Error, JobConfig, JobId, Result};
use isoforge_store::MemoryStore;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::queue::{QueueManager, QueueSettings};

/// Executor whose behaviour is driven by the job config.
///
/// `{"fail": true}` fails after reporting some progress, `{"panic": true}`
/// panics. A gated executor waits for [`ScriptedExecutor::release`] before
/// doing anything.
pub struct ScriptedExecutor {
    gate: Option<Semaphore>,
    started: Mutex<Vec<JobId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn auto() -> Arc<Self> {
        Arc::new(Self::with_gate(None))
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self::with_gate(Some(Semaphore::new(0))))
    }

    fn with_gate(gate: Option<Semaphore>) -> Self {
        Self {
            gate,
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Let `n` gated builds finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Jobs in the order the executor saw them.
    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildExecutor for ScriptedExecutor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, request: BuildRequest, events: BuildEvents) -> Result<BuildOutput> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.started.lock().unwrap().push(request.job_id);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        events.log("Initializing build environment".to_string()).await;
        events.progress(20).await;
        tokio::task::yield_now().await;
        events.progress(50).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let flag = |key: &str| request.config.get(key).and_then(|v| v.as_bool()) == Some(true);
        if flag("panic") {
            panic!("scripted panic");
        }
        if flag("fail") {
            return Err(Error::ExecutionFailed("scripted failure".to_string()));
        }

        events.log("Finalizing ISO".to_string()).await;
        events.progress(95).await;
        Ok(BuildOutput {
            output_path: Some(format!("/tmp/out/{}.iso", request.job_id)),
        })
    }
}

pub fn config(value: serde_json::Value) -> JobConfig {
    JobConfig::from_value(value).unwrap()
}

pub async fn open_manager(executor: Arc<ScriptedExecutor>) -> (Arc<QueueManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let settings = QueueSettings {
        idle_poll: Duration::from_millis(20),
        ..QueueSettings::default()
    };
    let manager = QueueManager::open(store.clone(), executor, settings).await;
    (manager, store)
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
