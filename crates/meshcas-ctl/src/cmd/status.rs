//! Daemon status, peers, and manifest listing commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    node_id: String,
    dht_addr: String,
    chunk_addr: String,
    uptime_secs: u64,
    routing_table_size: usize,
    chunks_cached: usize,
    cache_bytes: u64,
    manifests_known: usize,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
struct PeerInfo {
    node_id: String,
    addr: String,
}

#[derive(Deserialize)]
struct ManifestInfo {
    file_hash: String,
    original_name: String,
    size: u64,
    k: usize,
    m: usize,
}

// ── Commands ──────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  meshcas Node Status");
    println!("═══════════════════════════════════════");
    println!("  Node ID          : {}", resp.node_id);
    println!("  DHT address      : {}", resp.dht_addr);
    println!("  Chunk address    : {}", resp.chunk_addr);
    println!("  Uptime           : {}s", resp.uptime_secs);
    println!("  Routing table    : {} peers", resp.routing_table_size);
    println!("  Chunks cached    : {}", resp.chunks_cached);
    println!("  Cache size       : {} bytes", resp.cache_bytes);
    println!("  Manifests known  : {}", resp.manifests_known);

    Ok(())
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base_url(port))).await?;

    if resp.peers.is_empty() {
        println!("No peers in the routing table yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Routing Table ({})", resp.peers.len());
    println!("═══════════════════════════════════════");

    for p in &resp.peers {
        println!("  ┌─ {}", p.node_id);
        println!("  └─ addr: {}", p.addr);
    }

    Ok(())
}

pub async fn cmd_manifests(port: u16) -> Result<()> {
    let resp: Vec<ManifestInfo> = get_json(&format!("{}/manifests", base_url(port))).await?;

    if resp.is_empty() {
        println!("No files known locally.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Known Manifests ({})", resp.len());
    println!("═══════════════════════════════════════");

    for m in &resp {
        println!("  ┌─ {} ({})", m.file_hash, m.original_name);
        println!("  └─ size: {} bytes, k={}, m={}", m.size, m.k, m.m);
    }

    Ok(())
}
