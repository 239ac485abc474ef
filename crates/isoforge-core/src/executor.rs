//! Executor trait and build types.
//!
//! Executors turn a job's configuration into a running build. They report
//! log lines and progress milestones over a channel while they run, and
//! return the final outcome when the build ends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{JobConfig, JobId, Result};

/// Everything an executor needs to run one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// The job being built.
    pub job_id: JobId,
    /// Caller-supplied configuration, passed through untouched.
    pub config: JobConfig,
}

/// Incremental report from a running build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BuildEvent {
    /// A line of build output.
    Log(String),
    /// A progress milestone, 0-100.
    Progress(u8),
}

/// Result of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Path of the produced artifact, if any.
    pub output_path: Option<String>,
}

/// Sending half handed to executors for incremental reports.
pub type BuildEvents = mpsc::Sender<BuildEvent>;

/// Trait for build executors.
///
/// An executor must always terminate: the worker holds no timeout of its own.
/// Returning `Err` fails the job with the error's message.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run a build to completion.
    async fn execute(&self, request: BuildRequest, events: BuildEvents) -> Result<BuildOutput>;
}

/// Convenience helpers for executors emitting events.
///
/// A closed channel means the worker stopped listening; reports are dropped.
#[async_trait]
pub trait BuildEventsExt {
    async fn log(&self, line: String) -> bool;
    async fn progress(&self, value: u8) -> bool;
}

#[async_trait]
impl BuildEventsExt for BuildEvents {
    async fn log(&self, line: String) -> bool {
        self.send(BuildEvent::Log(line)).await.is_ok()
    }

    async fn progress(&self, value: u8) -> bool {
        self.send(BuildEvent::Progress(value.min(100))).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_event_wire_shape() {
        let log = serde_json::to_value(BuildEvent::Log("hello".to_string())).unwrap();
        assert_eq!(log, json!({ "kind": "log", "value": "hello" }));

        let progress = serde_json::to_value(BuildEvent::Progress(40)).unwrap();
        assert_eq!(progress, json!({ "kind": "progress", "value": 40 }));
    }

    #[tokio::test]
    async fn test_events_ext_clamps_progress() {
        let (tx, mut rx) = mpsc::channel::<BuildEvent>(4);
        assert!(tx.progress(250).await);
        assert!(tx.log("line".to_string()).await);
        assert_eq!(rx.recv().await, Some(BuildEvent::Progress(100)));
        assert_eq!(rx.recv().await, Some(BuildEvent::Log("line".to_string())));
    }

    #[tokio::test]
    async fn test_events_ext_reports_closed_channel() {
        let (tx, rx) = mpsc::channel::<BuildEvent>(1);
        drop(rx);
        assert!(!tx.log("nobody listening".to_string()).await);
    }
}
