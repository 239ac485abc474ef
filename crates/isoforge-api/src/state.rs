//! Application state.

use isoforge_config::{ExecutorConfig, ServerConfig};
use isoforge_core::executor::BuildExecutor;
use isoforge_executor::{ProcessExecutor, SimulatedExecutor};
use isoforge_scheduler::QueueManager;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ws::NotificationHub;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<QueueManager>,
    pub hub: Arc<NotificationHub>,
    pub profile_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Wrap a running queue manager and start the notification hub for it.
    pub fn new(manager: Arc<QueueManager>, config: &ServerConfig) -> Self {
        let hub = NotificationHub::start(manager.clone());
        Self {
            manager,
            hub,
            profile_dir: config.profile_dir.clone(),
            static_dir: config.static_dir.clone(),
        }
    }
}

/// Create the executor selected in the configuration.
pub fn build_executor(config: &ExecutorConfig) -> Arc<dyn BuildExecutor> {
    match config {
        ExecutorConfig::Process {
            command,
            working_dir,
            output_dir,
        } => {
            let mut executor = ProcessExecutor::new(command.clone(), output_dir);
            if let Some(dir) = working_dir {
                executor = executor.with_working_dir(dir);
            }
            Arc::new(executor)
        }
        ExecutorConfig::Simulated {
            step_delay,
            output_dir,
        } => Arc::new(SimulatedExecutor::new(output_dir).with_step_delay(*step_delay)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_executor_follows_config() {
        assert_eq!(build_executor(&ExecutorConfig::default()).name(), "process");

        let simulated = ExecutorConfig::Simulated {
            step_delay: Duration::ZERO,
            output_dir: PathBuf::from("/tmp/out"),
        };
        assert_eq!(build_executor(&simulated).name(), "simulated");
    }
}
