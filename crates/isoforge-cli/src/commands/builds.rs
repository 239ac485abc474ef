//! Build commands.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use isoforge_core::{Job, JobStatus};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::client::ApiClient;

const FOLLOW_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
    queue_position: usize,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    version: String,
    queue_size: usize,
    has_active_build: bool,
}

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    active: Option<Job>,
    queue: Vec<Job>,
    history: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct LogResponse {
    status: JobStatus,
    log: Vec<String>,
    progress: u8,
}

/// Merge the config file and `--package` flags into one build config.
///
/// Packages given on the command line are appended to any `packages` array
/// from the file.
pub fn build_config(file: Option<&str>, packages: Vec<String>) -> Result<Map<String, Value>> {
    let mut config = match file {
        Some(text) => match serde_json::from_str::<Value>(text).context("config is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("config file must contain a JSON object"),
        },
        None => Map::new(),
    };

    if !packages.is_empty() {
        let entry = config
            .entry("packages")
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(existing) => existing.extend(packages.into_iter().map(Value::String)),
            _ => bail!("`packages` in the config file must be an array"),
        }
    }

    if config.is_empty() {
        bail!("nothing to build: pass --file or at least one --package");
    }
    Ok(config)
}

pub async fn submit(client: &ApiClient, file: Option<&Path>, packages: Vec<String>) -> Result<()> {
    let text = match file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("could not read {}", path.display()))?,
        ),
        None => None,
    };
    let config = build_config(text.as_deref(), packages)?;

    let response: SubmitResponse = client.post("/api/build", &Value::Object(config)).await?;
    println!("Queued build {}", response.job_id);
    match response.queue_position {
        0 => println!("Next in line"),
        n => println!("{n} build(s) ahead in the queue"),
    }
    Ok(())
}

pub async fn status(client: &ApiClient) -> Result<()> {
    let status: StatusResponse = client.get("/api/status").await?;
    println!("Server online (version {})", status.version);
    println!("Queued builds: {}", status.queue_size);
    println!(
        "Active build:  {}",
        if status.has_active_build { "yes" } else { "no" }
    );
    Ok(())
}

pub async fn list(client: &ApiClient) -> Result<()> {
    let builds: BuildsResponse = client.get("/api/builds").await?;

    println!("ACTIVE");
    match &builds.active {
        Some(job) => println!("  {}", summary_line(job)),
        None => println!("  (none)"),
    }

    println!("QUEUED");
    if builds.queue.is_empty() {
        println!("  (none)");
    }
    for job in &builds.queue {
        println!("  {}", summary_line(job));
    }

    println!("HISTORY");
    if builds.history.is_empty() {
        println!("  (none)");
    }
    for job in builds.history.iter().rev() {
        println!("  {}", summary_line(job));
    }
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    let job: Job = client.get(&format!("/api/builds/{id}")).await?;

    println!("Build:     {}", job.id());
    println!("Status:    {}", job.status());
    println!("Progress:  {}%", job.progress());
    println!("Created:   {}", timestamp(job.created_at()));
    if let Some(at) = job.started_at() {
        println!("Started:   {}", timestamp(at));
    }
    if let Some(at) = job.completed_at() {
        println!("Finished:  {}", timestamp(at));
    }
    if let Some(path) = job.output_path() {
        println!("Output:    {path}");
    }
    if let Some(error) = job.error() {
        println!("Error:     {error}");
    }
    println!(
        "Config:    {}",
        serde_json::to_string_pretty(job.config()).unwrap_or_default()
    );
    Ok(())
}

pub async fn logs(client: &ApiClient, id: &str, follow: bool) -> Result<()> {
    let path = format!("/api/builds/{id}/log");
    let mut printed = 0;

    loop {
        let log: LogResponse = client.get(&path).await?;
        for line in log.log.iter().skip(printed) {
            println!("{line}");
        }
        printed = printed.max(log.log.len());

        if !follow || log.status.is_terminal() {
            if follow {
                println!("-- build {} at {}% --", log.status, log.progress);
            }
            return Ok(());
        }
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

fn summary_line(job: &Job) -> String {
    let mut line = format!(
        "{}  {:<11}  {:>3}%  {}",
        job.id(),
        job.status().as_str(),
        job.progress(),
        timestamp(job.created_at())
    );
    if let Some(error) = job.error() {
        line.push_str("  ");
        line.push_str(error);
    }
    line
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
