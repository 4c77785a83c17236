//! Store / retrieve / download commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::exit;
use super::http::{base_url, post_json_body_checked};

#[derive(Deserialize)]
struct StoreResponse {
    file_hash: String,
    k: usize,
    m: usize,
}

pub async fn cmd_store(port: u16, path: &str) -> Result<i32> {
    use reqwest::multipart;

    let file_data =
        std::fs::read(path).with_context(|| format!("failed to read file: {}", path))?;

    let filename = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();

    let part = multipart::Part::bytes(file_data).file_name(filename);
    let form = multipart::Form::new().part("file", part);

    let response = reqwest::Client::new()
        .post(format!("{}/store", base_url(port)))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("failed to connect to meshd at {} — is it running?", base_url(port)))?;

    let status = response.status();
    if status.is_success() {
        let resp: StoreResponse = response.json().await.context("failed to parse response")?;
        println!("Stored {}", path);
        println!("  file_hash : {}", resp.file_hash);
        println!("  k / m     : {} / {}", resp.k, resp.m);
        Ok(exit::OK)
    } else {
        let body = response.text().await.unwrap_or_default();
        eprintln!("store failed: {}", body);
        Ok(exit::classify(status, &body))
    }
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    file_hash: &'a str,
    out_path: &'a str,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    out_path: String,
}

pub async fn cmd_retrieve(port: u16, file_hash: &str, out_path: &str) -> Result<i32> {
    let req = RetrieveRequest { file_hash, out_path };
    let url = format!("{}/retrieve", base_url(port));
    match post_json_body_checked::<_, RetrieveResponse>(&url, &req).await? {
        Ok(resp) => {
            println!("Retrieved to {}", resp.out_path);
            Ok(exit::OK)
        }
        Err((status, body)) => {
            eprintln!("retrieve failed: {}", body);
            Ok(exit::classify(status, &body))
        }
    }
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    file_hash: &'a str,
    out_path: &'a str,
}

#[derive(Deserialize)]
struct DownloadResponse {
    out_path: String,
}

pub async fn cmd_download(port: u16, file_hash: &str, out_path: &str) -> Result<i32> {
    let req = DownloadRequest { file_hash, out_path };
    let url = format!("{}/download", base_url(port));
    match post_json_body_checked::<_, DownloadResponse>(&url, &req).await? {
        Ok(resp) => {
            println!("Downloaded to {}", resp.out_path);
            Ok(exit::OK)
        }
        Err((status, body)) => {
            eprintln!("download failed: {}", body);
            Ok(exit::classify(status, &body))
        }
    }
}
