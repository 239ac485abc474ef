//! Child-process executor.

use async_trait::async_trait;
use isoforge_core::executor::{BuildEvents, BuildEventsExt, BuildExecutor, BuildOutput, BuildRequest};
use isoforge_core::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::SystemTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

/// Environment variable carrying the job config as JSON.
pub const CONFIG_ENV: &str = "ISOFORGE_CONFIG";
/// Environment variable carrying the job id.
pub const JOB_ID_ENV: &str = "ISOFORGE_JOB_ID";

// `::progress 40` or `::artifact /workdir/out/arch.iso`
static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^::(progress|artifact)\s+(.+?)\s*$").unwrap()
});

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Progress(u8),
    Artifact(String),
    Output(String),
}

fn classify(line: String) -> Line {
    let marker = MARKER_REGEX.captures(&line).and_then(|caps| {
        let value = caps.get(2)?.as_str();
        match caps.get(1)?.as_str() {
            "progress" => value.parse::<u8>().ok().map(Line::Progress),
            _ => Some(Line::Artifact(value.to_string())),
        }
    });
    marker.unwrap_or(Line::Output(line))
}

/// Runs the ISO build command and streams its output into the job log.
///
/// The command sees the job config as JSON in `ISOFORGE_CONFIG`. Output lines
/// `::progress <n>` and `::artifact <path>` are treated as markers instead of
/// log lines.
pub struct ProcessExecutor {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
    output_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(command: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            working_dir: None,
            output_dir: output_dir.into(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, request: &BuildRequest) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::InvalidInput("build command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env(CONFIG_ENV, request.config.to_json_string())
            .env(JOB_ID_ENV, request.job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl BuildExecutor for ProcessExecutor {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, request: BuildRequest, events: BuildEvents) -> Result<BuildOutput> {
        let mut child = self.command(&request)?.spawn().map_err(|e| {
            Error::ExecutionFailed(format!("could not start {}: {e}", self.command.join(" ")))
        })?;
        info!(job_id = %request.job_id, pid = ?child.id(), "Started build process");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

        let mut lines = LinesStream::new(BufReader::new(stdout).lines())
            .merge(LinesStream::new(BufReader::new(stderr).lines()));

        let mut artifact = None;
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(job_id = %request.job_id, error = %e, "Error reading build output");
                    continue;
                }
            };
            match classify(line) {
                Line::Progress(n) => {
                    events.progress(n).await;
                }
                Line::Artifact(path) => {
                    debug!(job_id = %request.job_id, path = %path, "Build reported artifact");
                    artifact = Some(path);
                }
                Line::Output(line) => {
                    events.log(line).await;
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::ExecutionFailed(format!("build exited with {status}")));
        }

        let output_path = match artifact {
            Some(path) => Some(path),
            None => newest_iso(&self.output_dir).await,
        };
        if output_path.is_none() {
            warn!(job_id = %request.job_id, dir = %self.output_dir.display(), "Build produced no ISO");
        }
        Ok(BuildOutput { output_path })
    }
}

/// Most recently modified `*.iso` directly inside `dir`.
async fn newest_iso(dir: &Path) -> Option<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read output directory");
            return None;
        }
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "iso") {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(at, _)| modified > *at) {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path.to_string_lossy().into_owned())
}
