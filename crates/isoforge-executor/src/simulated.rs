//! Simulated executor for demos and development without archiso.

use async_trait::async_trait;
use chrono::Utc;
use isoforge_core::executor::{BuildEvents, BuildEventsExt, BuildExecutor, BuildOutput, BuildRequest};
use isoforge_core::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Log line and progress milestone for each simulated stage.
pub const BUILD_STEPS: &[(&str, u8)] = &[
    ("Initializing build environment", 15),
    ("Preparing file system", 20),
    ("Installing base packages", 30),
    ("Installing custom packages", 50),
    ("Configuring system", 60),
    ("Blacklisting PC speaker modules", 70),
    ("Creating hooks", 80),
    ("Building ISO image", 90),
    ("Finalizing ISO", 95),
];

const CONFIG_LOGGED_PROGRESS: u8 = 10;

/// Walks through the archiso stages with a fixed delay between them and
/// reports a dated ISO path in the output directory.
pub struct SimulatedExecutor {
    output_dir: PathBuf,
    step_delay: Duration,
    fail_at: Option<usize>,
}

impl SimulatedExecutor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            step_delay: Duration::from_secs(2),
            fail_at: None,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Fail when reaching the stage at `index` in [`BUILD_STEPS`].
    pub fn fail_at_step(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    fn artifact_path(&self) -> PathBuf {
        let date = Utc::now().format("%Y.%m.%d");
        self.output_dir.join(format!("archlinux-{date}-x86_64.iso"))
    }
}

#[async_trait]
impl BuildExecutor for SimulatedExecutor {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn execute(&self, request: BuildRequest, events: BuildEvents) -> Result<BuildOutput> {
        events.log("Starting ISO build process".to_string()).await;
        events
            .log(format!(
                "Build configuration: {}",
                request.config.to_json_string()
            ))
            .await;
        events.progress(CONFIG_LOGGED_PROGRESS).await;

        for (index, (step, progress)) in BUILD_STEPS.iter().enumerate() {
            if self.fail_at == Some(index) {
                return Err(Error::ExecutionFailed(format!("{step} failed")));
            }
            events.log((*step).to_string()).await;
            events.progress(*progress).await;
            tokio::time::sleep(self.step_delay).await;
        }

        events.log("ISO build completed successfully".to_string()).await;
        let output_path = self.artifact_path();
        info!(job_id = %request.job_id, path = %output_path.display(), "Simulated build finished");
        Ok(BuildOutput {
            output_path: Some(output_path.to_string_lossy().into_owned()),
        })
    }
}
