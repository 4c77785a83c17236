//! Peer manager: publish/lookup of chunk holders and file manifests
//! over the DHT overlay (spec 4.8).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use meshcas_core::wire::{manifest_key, DhtValue, FileManifest, NodeDescriptor};

use crate::dht::DhtNode;

pub struct PeerManager {
    dht: Arc<DhtNode>,
}

impl PeerManager {
    pub fn new(dht: Arc<DhtNode>) -> Arc<Self> {
        Arc::new(Self { dht })
    }

    pub fn local(&self) -> &NodeDescriptor {
        &self.dht.local
    }

    /// Announce that this node holds `chunk_hash`, publishing this
    /// node's chunk-transfer (TCP) contact info.
    pub async fn publish_chunk_holder(&self, chunk_hash: &str) -> bool {
        let value = serde_json::to_value(self.dht.local.clone()).unwrap();
        self.dht.set(chunk_hash, value).await
    }

    /// Resolve the set of peers that claim to hold `chunk_hash`. DHT
    /// values are advisory; the downloader re-verifies on receipt.
    pub async fn find_chunk_holder(&self, chunk_hash: &str) -> Vec<NodeDescriptor> {
        match self.dht.get(chunk_hash).await {
            Some(v) => parse_holders(v),
            None => Vec::new(),
        }
    }

    /// Batch variant: concurrent lookups, failures collapse to an empty
    /// list rather than an error.
    pub async fn find_holders(&self, chunk_hashes: &[String]) -> HashMap<String, Vec<NodeDescriptor>> {
        let results = join_all(chunk_hashes.iter().map(|h| async move {
            (h.clone(), self.find_chunk_holder(h).await)
        }))
        .await;
        results.into_iter().collect()
    }

    pub async fn publish_file_manifest(&self, manifest: &FileManifest) -> bool {
        let key = manifest_key(&manifest.file_hash);
        let value = serde_json::to_value(DhtValue::FileManifest {
            manifest: manifest.clone(),
            publisher: self.dht.local.clone(),
        })
        .unwrap();
        self.dht.set(&key, value).await
    }

    pub async fn resolve_file_manifest(&self, file_hash: &str) -> Option<(FileManifest, NodeDescriptor)> {
        let key = manifest_key(file_hash);
        let value = self.dht.get(&key).await?;
        match serde_json::from_value::<DhtValue>(value).ok()? {
            DhtValue::FileManifest { manifest, publisher } => Some((manifest, publisher)),
            DhtValue::ChunkHolders(_) => None,
        }
    }
}

fn parse_holders(value: serde_json::Value) -> Vec<NodeDescriptor> {
    if let Ok(DhtValue::ChunkHolders(holders)) = serde_json::from_value::<DhtValue>(value.clone()) {
        return holders;
    }
    serde_json::from_value::<NodeDescriptor>(value)
        .map(|n| vec![n])
        .unwrap_or_default()
}
