//! Parallel chunk downloader (spec 4.9): resolves a manifest and its
//! chunk holders via the peer manager, fetches data chunks concurrently
//! (bounded by a semaphore) with per-chunk retry across candidate
//! peers, verifies each chunk's hash on arrival, and hands everything
//! to the CAS for reassembly/parity recovery.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meshcas_core::hash::sha256_hex;
use meshcas_core::wire::{FileManifest, NodeDescriptor, TransferRequest, TransferResponse};
use meshcas_store::Cas;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use crate::peer_manager::PeerManager;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no manifest found for {0}")]
    ManifestNotFound(String),
    #[error("no holders reachable for any data chunk")]
    NoHoldersReachable,
    #[error(transparent)]
    Cas(#[from] anyhow::Error),
}

pub struct DownloadPolicy {
    pub max_concurrency: usize,
    pub per_connection_timeout: Duration,
    pub max_retries_per_chunk: usize,
}

/// Resolve `file_hash`'s manifest through the peer manager, download
/// every data chunk in parallel, and reassemble into `out_path` via the
/// CAS (which recovers at most one missing data chunk from parity).
pub async fn download_file(
    file_hash: &str,
    out_path: &Path,
    cas: Arc<Cas>,
    peers: Arc<PeerManager>,
    policy: DownloadPolicy,
) -> Result<(), DownloadError> {
    let manifest = match cas.get_manifest(file_hash) {
        Some(m) => m,
        None => {
            let (manifest, _publisher) = peers
                .resolve_file_manifest(file_hash)
                .await
                .ok_or_else(|| DownloadError::ManifestNotFound(file_hash.to_string()))?;
            cas.adopt_manifest(manifest.clone())?;
            manifest
        }
    };

    fetch_missing_chunks(&manifest, &cas, &peers, &policy).await?;

    Ok(cas.retrieve_file(file_hash, out_path)?)
}

async fn fetch_missing_chunks(
    manifest: &FileManifest,
    cas: &Arc<Cas>,
    peers: &Arc<PeerManager>,
    policy: &DownloadPolicy,
) -> Result<(), DownloadError> {
    let mut wanted: Vec<String> = manifest
        .data_chunks
        .iter()
        .chain(manifest.parity_chunks.iter())
        .filter(|h| !cas.chunk_cache().has(h))
        .cloned()
        .collect();
    wanted.dedup();
    if wanted.is_empty() {
        return Ok(());
    }

    let holders = peers.find_holders(&wanted).await;
    if holders.values().all(|v| v.is_empty()) {
        return Err(DownloadError::NoHoldersReachable);
    }

    let semaphore = Arc::new(Semaphore::new(policy.max_concurrency.max(1)));
    let fetches = wanted.into_iter().map(|hash| {
        let semaphore = semaphore.clone();
        let cas = cas.clone();
        let candidates = holders.get(&hash).cloned().unwrap_or_default();
        let timeout = policy.per_connection_timeout;
        let max_retries = policy.max_retries_per_chunk.min(candidates.len().max(1));
        async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let bytes = fetch_with_retry(&hash, &candidates, max_retries, timeout).await;
            if let Some(bytes) = bytes {
                let _ = cas.chunk_cache().put(&hash, &bytes);
            }
            (hash, bytes.is_some())
        }
    });

    let results: HashMap<String, bool> = futures::future::join_all(fetches).await.into_iter().collect();
    let fetched_any = results.values().any(|ok| *ok);
    if !fetched_any && !results.is_empty() {
        return Err(DownloadError::NoHoldersReachable);
    }
    Ok(())
}

/// Try up to `max_retries` candidate peers in order, switching peers on
/// each failed attempt (spec: bad hash, timeout, and connect failures
/// all count as a failed attempt).
async fn fetch_with_retry(
    chunk_hash: &str,
    candidates: &[NodeDescriptor],
    max_retries: usize,
    timeout: Duration,
) -> Option<Bytes> {
    for peer in candidates.iter().take(max_retries) {
        match tokio::time::timeout(timeout, fetch_chunk_from(peer, chunk_hash)).await {
            Ok(Ok(Some(bytes))) => return Some(bytes),
            Ok(Ok(None)) => tracing::debug!(%chunk_hash, peer = %peer.chunk_addr(), "peer declined chunk"),
            Ok(Err(e)) => tracing::debug!(%chunk_hash, peer = %peer.chunk_addr(), error = %e, "chunk fetch failed"),
            Err(_) => tracing::debug!(%chunk_hash, peer = %peer.chunk_addr(), "chunk fetch timed out"),
        }
    }
    None
}

async fn fetch_chunk_from(peer: &NodeDescriptor, chunk_hash: &str) -> anyhow::Result<Option<Bytes>> {
    let stream = TcpStream::connect(peer.chunk_addr()).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = TransferRequest::GetChunk { chunk_hash: chunk_hash.to_string() };
    let mut line = serde_json::to_vec(&request)?;
    line.push(b'\n');
    writer.write_all(&line).await?;

    let mut header_line = String::new();
    reader.read_line(&mut header_line).await?;
    let response: TransferResponse = serde_json::from_str(header_line.trim())?;

    let size = match response {
        TransferResponse::ChunkStart { size } => size,
        TransferResponse::Error { message } => {
            tracing::debug!(%chunk_hash, %message, "peer returned error for GET_CHUNK");
            return Ok(None);
        }
        _ => return Ok(None),
    };

    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf).await?;

    if sha256_hex(&buf) != chunk_hash {
        tracing::warn!(%chunk_hash, peer = %peer.chunk_addr(), "chunk hash mismatch, discarding");
        return Ok(None);
    }

    Ok(Some(Bytes::from(buf)))
}
