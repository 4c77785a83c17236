//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to meshd at {} — is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

/// Posts a JSON body and, on a non-2xx response, returns the status
/// code and body text instead of failing to deserialize — lets callers
/// map daemon error responses onto process exit codes.
pub async fn post_json_body_checked<T, R>(
    url: &str,
    body: &T,
) -> Result<std::result::Result<R, (reqwest::StatusCode, String)>>
where
    T: Serialize,
    R: for<'de> Deserialize<'de>,
{
    let response = reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to meshd at {} — is it running?", url))?;

    let status = response.status();
    if status.is_success() {
        let parsed = response.json::<R>().await.context("failed to parse response")?;
        Ok(Ok(parsed))
    } else {
        let text = response.text().await.unwrap_or_default();
        Ok(Err((status, text)))
    }
}
