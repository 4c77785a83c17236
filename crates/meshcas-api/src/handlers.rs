//! HTTP API handlers — exposes a running [`MeshNode`]'s state and
//! operations as JSON.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use meshcas_core::wire::FileManifest;
use meshd::node::MeshNode;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<MeshNode>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(node: Arc<MeshNode>) -> Self {
        Self {
            node,
            started_at: Instant::now(),
        }
    }
}

/// Unique-enough suffix for staged upload files so concurrent `/store`
/// calls never collide on the same temp path.
fn upload_nonce() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("{}-{}", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed))
}

// ── /status ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub dht_addr: String,
    pub chunk_addr: String,
    pub uptime_secs: u64,
    pub routing_table_size: usize,
    pub chunks_cached: usize,
    pub cache_bytes: u64,
    pub manifests_known: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let node = &state.node;
    Json(StatusResponse {
        node_id: node.local().node_id.to_hex(),
        dht_addr: node.dht_addr.to_string(),
        chunk_addr: node.chunk_addr.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        routing_table_size: node.routing.len(),
        chunks_cached: node.cas.chunk_cache().count(),
        cache_bytes: node.cas.chunk_cache().size(),
        manifests_known: node.cas.list_manifests().len(),
    })
}

// ── /peers ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub node_id: String,
    pub addr: String,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .node
        .routing
        .all_nodes()
        .into_iter()
        .map(|n| PeerInfo {
            node_id: n.node_id.to_hex(),
            addr: n.dht_addr().to_string(),
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── /manifests ───────────────────────────────────────────────────────────

pub async fn handle_manifests(State(state): State<ApiState>) -> Json<Vec<FileManifest>> {
    Json(state.node.cas.list_manifests())
}

// ── /store ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StoreResponse {
    pub file_hash: String,
    pub k: usize,
    pub m: usize,
}

pub async fn handle_store(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<StoreResponse>, (StatusCode, String)> {
    let mut filename = String::from("uploaded_file");
    let mut data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if let Some(name) = field.file_name() {
            filename = name.to_string();
        }
        data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
            .to_vec();
    }

    if data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "no file data".to_string()));
    }

    // Only the base name is trusted; a client-supplied path must never
    // escape the scratch directory it's staged in.
    let safe_name = std::path::Path::new(&filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "uploaded_file".to_string());
    let temp_path = std::env::temp_dir().join(format!("meshcas-upload-{}-{safe_name}", upload_nonce()));
    std::fs::write(&temp_path, &data).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let manifest = state
        .node
        .ingest_and_publish(&temp_path)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(file_hash = %manifest.file_hash, size = manifest.size, "file stored via API");

    Ok(Json(StoreResponse {
        file_hash: manifest.file_hash,
        k: manifest.k,
        m: manifest.m,
    }))
}

// ── /retrieve ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RetrieveRequest {
    pub file_hash: String,
    pub out_path: String,
}

#[derive(Serialize)]
pub struct RetrieveResponse {
    pub file_hash: String,
    pub out_path: String,
}

pub async fn handle_retrieve(
    State(state): State<ApiState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, (StatusCode, String)> {
    let out_path = std::path::PathBuf::from(&req.out_path);
    state
        .node
        .cas
        .retrieve_file(&req.file_hash, &out_path)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    Ok(Json(RetrieveResponse {
        file_hash: req.file_hash,
        out_path: req.out_path,
    }))
}

// ── /download ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DownloadRequest {
    pub file_hash: String,
    pub out_path: String,
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub file_hash: String,
    pub out_path: String,
}

pub async fn handle_download(
    State(state): State<ApiState>,
    Json(req): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, (StatusCode, String)> {
    let out_path = std::path::PathBuf::from(&req.out_path);
    state
        .node
        .download(&req.file_hash, &out_path)
        .await
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    Ok(Json(DownloadResponse {
        file_hash: req.file_hash,
        out_path: req.out_path,
    }))
}
