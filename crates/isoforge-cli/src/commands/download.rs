//! ISO download command.

use anyhow::{Context, Result};
use reqwest::header::CONTENT_DISPOSITION;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::client::ApiClient;

pub async fn download(client: &ApiClient, id: &str, output: Option<PathBuf>) -> Result<()> {
    let mut response = client.get_raw(&format!("/api/downloads/{id}")).await?;

    let output = output.unwrap_or_else(|| {
        let name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename)
            .unwrap_or_else(|| format!("{id}.iso"));
        PathBuf::from(name)
    });

    let mut file = tokio::fs::File::create(&output)
        .await
        .with_context(|| format!("could not create {}", output.display()))?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.context("download interrupted")? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    println!("Saved {} ({} bytes)", output.display(), written);
    Ok(())
}

/// File name from `attachment; filename="..."`, without any directory part.
fn attachment_filename(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let name = rest.split(';').next()?.trim().trim_matches('"');
    let name = name.rsplit(['/', '\\']).next()?;
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}
