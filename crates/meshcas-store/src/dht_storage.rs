//! Local DHT value storage: the key/value overlay a node serves in
//! response to `FIND_VALUE`, and stores into in response to `STORE`.
//!
//! Two key families get different write semantics (§9): chunk-holder
//! keys (bare 64-char hex SHA-256) accumulate a bounded set of holders,
//! while manifest keys (`file_manifest:<hash>`) simply overwrite, since a
//! manifest has one authoritative current value from its publisher.

use dashmap::DashMap;
use meshcas_core::wire::{is_chunk_key, DhtValue, NodeDescriptor};
use serde_json::Value;

/// Local key/value store backing this node's share of the DHT.
pub struct DhtStorage {
    entries: DashMap<String, Value>,
    max_holders_per_key: usize,
}

impl DhtStorage {
    pub fn new(max_holders_per_key: usize) -> Self {
        Self { entries: DashMap::new(), max_holders_per_key }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply an inbound `STORE(key, value)`, merging per the key's
    /// family rather than blindly overwriting.
    pub fn store(&self, key: &str, value: Value) {
        if is_chunk_key(key) {
            self.merge_holder(key, value);
        } else {
            self.entries.insert(key.to_string(), value);
        }
    }

    fn merge_holder(&self, key: &str, incoming: Value) {
        let incoming_holders: Vec<NodeDescriptor> =
            match serde_json::from_value::<DhtValue>(incoming.clone()) {
                Ok(DhtValue::ChunkHolders(h)) => h,
                _ => match serde_json::from_value::<NodeDescriptor>(incoming) {
                    Ok(single) => vec![single],
                    Err(_) => return,
                },
            };

        let mut merged = match self.entries.get(key) {
            Some(existing) => {
                serde_json::from_value::<Vec<NodeDescriptor>>(existing.clone()).unwrap_or_default()
            }
            None => Vec::new(),
        };

        for holder in incoming_holders {
            if let Some(pos) = merged.iter().position(|h| h.node_id == holder.node_id) {
                merged.remove(pos);
            }
            merged.push(holder);
        }

        while merged.len() > self.max_holders_per_key {
            merged.remove(0);
        }

        self.entries.insert(key.to_string(), serde_json::to_value(merged).unwrap());
    }

    pub fn holders(&self, chunk_hash: &str) -> Vec<NodeDescriptor> {
        self.entries
            .get(chunk_hash)
            .and_then(|v| serde_json::from_value::<Vec<NodeDescriptor>>(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: &str) -> NodeDescriptor {
        NodeDescriptor {
            node_id: meshcas_core::ids::generate_id(Some(seed)),
            ip: "127.0.0.1".into(),
            dht_port: 9000,
            chunk_port: 9001,
        }
    }

    #[test]
    fn manifest_keys_overwrite() {
        let store = DhtStorage::new(20);
        let key = "file_manifest:abc";
        store.store(key, serde_json::json!({"v": 1}));
        store.store(key, serde_json::json!({"v": 2}));
        assert_eq!(store.get(key).unwrap()["v"], 2);
    }

    #[test]
    fn chunk_holder_keys_merge_across_stores() {
        let store = DhtStorage::new(20);
        let key = meshcas_core::hash::sha256_hex(b"chunk");
        store.store(&key, serde_json::to_value(vec![peer("a")]).unwrap());
        store.store(&key, serde_json::to_value(vec![peer("b")]).unwrap());
        let holders = store.holders(&key);
        assert_eq!(holders.len(), 2);
    }

    #[test]
    fn holder_set_is_bounded() {
        let store = DhtStorage::new(2);
        let key = meshcas_core::hash::sha256_hex(b"chunk");
        for seed in ["a", "b", "c"] {
            store.store(&key, serde_json::to_value(vec![peer(seed)]).unwrap());
        }
        assert_eq!(store.holders(&key).len(), 2);
        let ids: Vec<_> = store.holders(&key).into_iter().map(|h| h.node_id).collect();
        assert!(!ids.contains(&peer("a").node_id));
    }

    #[test]
    fn re_storing_same_holder_does_not_duplicate() {
        let store = DhtStorage::new(20);
        let key = meshcas_core::hash::sha256_hex(b"chunk");
        store.store(&key, serde_json::to_value(vec![peer("a")]).unwrap());
        store.store(&key, serde_json::to_value(vec![peer("a")]).unwrap());
        assert_eq!(store.holders(&key).len(), 1);
    }
}
