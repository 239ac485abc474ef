//! Worker that runs queued builds one at a time.

use isoforge_core::executor::{BuildEvent, BuildOutput, BuildRequest};
use isoforge_core::{Error, Job};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::queue::QueueManager;

const BUILD_EVENT_BUFFER: usize = 256;

/// The single consumer of a [`QueueManager`]'s queue.
pub(crate) struct Worker {
    manager: Arc<QueueManager>,
}

impl Worker {
    pub(crate) fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    /// Run the worker loop. Never returns while the runtime is alive.
    pub(crate) async fn run(self) {
        info!("Starting worker");

        loop {
            match self.manager.claim_next().await {
                Some(job) => self.process(job).await,
                None => self.manager.wait_for_work().await,
            }
        }
    }

    /// Execute one claimed job and record its outcome.
    ///
    /// The executor runs on its own task. Its reports are applied as they
    /// arrive, and a panic inside it fails the job like any other error.
    async fn process(&self, job: Job) {
        let id = job.id();
        info!(job_id = %id, "Processing job");

        let request = BuildRequest {
            job_id: id,
            config: job.config().clone(),
        };
        let (tx, mut rx) = mpsc::channel::<BuildEvent>(BUILD_EVENT_BUFFER);
        let executor = self.manager.executor();
        let mut handle = tokio::spawn(async move { executor.execute(request, tx).await });

        let joined = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => self.manager.apply_build_event(id, event).await,
                joined = &mut handle => break joined,
            }
        };

        // Reports sent just before the executor returned.
        while let Ok(event) = rx.try_recv() {
            self.manager.apply_build_event(id, event).await;
        }

        let outcome = outcome_of(joined);
        debug!(job_id = %id, ok = outcome.is_ok(), "Executor returned");
        self.manager.finish(id, outcome).await;
    }
}

fn outcome_of(
    joined: Result<isoforge_core::Result<BuildOutput>, JoinError>,
) -> Result<BuildOutput, String> {
    match joined {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(Error::ExecutionFailed(message))) => Err(format!("Build failed: {message}")),
        Ok(Err(e)) => Err(format!("Build failed: {e}")),
        Err(e) if e.is_panic() => Err(format!("Build failed: executor panicked: {}", panic_message(e))),
        Err(e) => Err(format!("Build failed: {e}")),
    }
}

fn panic_message(e: JoinError) -> String {
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
