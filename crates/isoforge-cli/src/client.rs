//! Thin HTTP client for the isoforge API.

use anyhow::{Context, Result, bail};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(mut base: Url) -> Self {
        // Relative joins replace the last path segment unless it ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid API path: {path}"))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get_raw(path).await?;
        response
            .json()
            .await
            .with_context(|| format!("unexpected response from {path}"))
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("could not reach {}", self.base))?;
        check(response)
            .await?
            .json()
            .await
            .with_context(|| format!("unexpected response from {path}"))
    }

    /// GET with error statuses turned into errors, body left unread.
    pub async fn get_raw(&self, path: &str) -> Result<Response> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("could not reach {}", self.base))?;
        check(response).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{}", error_message(status, &body))
}

/// Prefer the server's `{"error": ...}` message over the bare status.
fn error_message(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from));
    match message {
        Some(message) => format!("{message} ({status})"),
        None => format!("server returned {status}"),
    }
}
