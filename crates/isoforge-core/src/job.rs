//! Build jobs and their lifecycle.
//!
//! A job moves `queued -> in_progress -> {completed, failed}` and nothing
//! else. The mutators below are the only way to change a job's state and
//! each one checks the transition before touching any field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{Error, JobId, Result};

/// Progress recorded when the worker claims a job.
pub const STARTED_PROGRESS: u8 = 5;

/// Highest progress a job can report before it completes.
const MAX_RUNNING_PROGRESS: u8 = 99;

/// Status of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Claimed by the worker and currently building.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied build configuration.
///
/// Opaque to the queue: it is stored, persisted and handed to the executor
/// untouched. The only requirement is that it is a non-empty JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobConfig(Map<String, Value>);

impl JobConfig {
    /// Validate a submission payload.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) if !map.is_empty() => Ok(Self(map)),
            Value::Object(_) | Value::Null => Err(Error::InvalidInput(
                "No configuration provided".to_string(),
            )),
            other => Err(Error::InvalidInput(format!(
                "configuration must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<Map<String, Value>> for JobConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Timestamp parsing for persisted jobs.
///
/// Records are written as RFC 3339, but older data files carry naive local
/// timestamps such as `2024-05-01T10:00:00.123456`; those are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error as _};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub(super) fn deserialize_option<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}"))),
            None => Ok(None),
        }
    }
}

/// A single ISO build request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    config: JobConfig,
    #[serde(deserialize_with = "timestamp::deserialize")]
    created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    build_log: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    progress: u8,
}

impl Job {
    /// Create a freshly queued job.
    pub fn new(config: JobConfig) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            build_log: Vec::new(),
            error: None,
            output_path: None,
            progress: 0,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn build_log(&self) -> &[String] {
        &self.build_log
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_path.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Claim the job for building.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.check(JobStatus::Queued, JobStatus::InProgress)?;
        self.status = JobStatus::InProgress;
        self.started_at = Some(at.max(self.created_at));
        self.progress = self.progress.max(STARTED_PROGRESS);
        Ok(())
    }

    /// Append a timestamped line to the build log.
    pub fn push_log(&mut self, line: &str, at: DateTime<Utc>) -> Result<()> {
        self.check(JobStatus::InProgress, JobStatus::InProgress)?;
        self.build_log.push(format!("[{}] {}", at.to_rfc3339(), line));
        Ok(())
    }

    /// Record a progress milestone.
    ///
    /// Returns `false` when the value would not move progress forward.
    /// Running jobs top out at 99; only `complete` reaches 100.
    pub fn advance_progress(&mut self, value: u8) -> Result<bool> {
        self.check(JobStatus::InProgress, JobStatus::InProgress)?;
        let value = value.min(MAX_RUNNING_PROGRESS);
        if value <= self.progress {
            return Ok(false);
        }
        self.progress = value;
        Ok(true)
    }

    /// Finish the job successfully.
    pub fn complete(&mut self, output_path: Option<String>, at: DateTime<Utc>) -> Result<()> {
        self.check(JobStatus::InProgress, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.output_path = output_path.filter(|p| !p.is_empty());
        self.completed_at = Some(self.not_before_start(at));
        Ok(())
    }

    /// Finish the job with an error.
    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        self.check(JobStatus::InProgress, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(self.not_before_start(at));
        Ok(())
    }

    fn check(&self, expected: JobStatus, to: JobStatus) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    fn not_before_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.started_at.map_or(at, |started| at.max(started))
    }
}
