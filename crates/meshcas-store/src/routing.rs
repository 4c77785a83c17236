//! Kademlia routing table: 160 k-buckets of up to K node descriptors
//! each, ordered by recency of contact.

use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use meshcas_core::ids::{bucket_index, NodeId, NODE_ID_BYTES};
use meshcas_core::wire::NodeDescriptor;

const BUCKET_COUNT: usize = NODE_ID_BYTES * 8;

/// Outcome of inserting a node into a [`KBucket`].
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Node was added (or refreshed, if already present).
    Inserted,
    /// The bucket is full; `head` is the least-recently-seen entry, a
    /// candidate for a liveness probe before the new node is admitted.
    /// The new node was pushed to the replacement cache in the meantime.
    BucketFull { head: NodeDescriptor },
}

/// A single k-bucket: up to K live entries plus a bounded replacement
/// cache of nodes waiting for a spot.
pub struct KBucket {
    capacity: usize,
    nodes: Vec<NodeDescriptor>,
    replacement_cache: Vec<NodeDescriptor>,
    last_updated: Instant,
}

impl KBucket {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: Vec::new(),
            replacement_cache: Vec::new(),
            last_updated: Instant::now(),
        }
    }

    /// Insert or refresh `node`. Moves an existing entry to the tail
    /// (most-recently-seen); appends a new entry if there is room;
    /// otherwise parks it in the replacement cache and reports the
    /// current head as a liveness-check candidate.
    pub fn insert(&mut self, node: NodeDescriptor) -> InsertOutcome {
        if let Some(pos) = self.nodes.iter().position(|n| n.node_id == node.node_id) {
            let existing = self.nodes.remove(pos);
            self.nodes.push(existing);
            self.last_updated = Instant::now();
            return InsertOutcome::Inserted;
        }

        if self.nodes.len() < self.capacity {
            self.nodes.push(node);
            self.last_updated = Instant::now();
            return InsertOutcome::Inserted;
        }

        if !self.replacement_cache.iter().any(|n| n.node_id == node.node_id) {
            self.replacement_cache.push(node);
            if self.replacement_cache.len() > self.capacity {
                self.replacement_cache.remove(0);
            }
        }
        InsertOutcome::BucketFull { head: self.nodes[0].clone() }
    }

    /// Remove `node_id`, promoting the oldest replacement-cache entry
    /// into its place if one is waiting.
    pub fn remove(&mut self, node_id: &NodeId) -> bool {
        if let Some(pos) = self.nodes.iter().position(|n| &n.node_id == node_id) {
            self.nodes.remove(pos);
            if !self.replacement_cache.is_empty() {
                self.nodes.push(self.replacement_cache.remove(0));
            }
            self.last_updated = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.node_id == node_id)
    }

    pub fn nodes(&self) -> Vec<NodeDescriptor> {
        self.nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_stale(&self, refresh_interval_secs: u64) -> bool {
        self.last_updated.elapsed().as_secs() >= refresh_interval_secs
    }
}

/// The full Kademlia routing table: 160 independently-locked k-buckets.
/// Buckets are locked individually (never two at once) so unrelated
/// regions of the ID space never contend.
pub struct RoutingTable {
    local_id: NodeId,
    k: usize,
    buckets: DashMap<usize, Mutex<KBucket>>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId, k: usize) -> Self {
        let buckets = DashMap::new();
        for i in 0..BUCKET_COUNT {
            buckets.insert(i, Mutex::new(KBucket::new(k)));
        }
        Self { local_id, k, buckets }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Insert a node. Never inserts the local node.
    pub fn insert(&self, node: NodeDescriptor) -> Option<InsertOutcome> {
        let idx = bucket_index(&self.local_id, &node.node_id)?;
        let bucket = self.buckets.get(&idx)?;
        Some(bucket.lock().unwrap().insert(node))
    }

    pub fn remove(&self, node_id: &NodeId) -> bool {
        match bucket_index(&self.local_id, node_id) {
            Some(idx) => self
                .buckets
                .get(&idx)
                .map(|b| b.lock().unwrap().remove(node_id))
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        match bucket_index(&self.local_id, node_id) {
            Some(idx) => self
                .buckets
                .get(&idx)
                .map(|b| b.lock().unwrap().contains(node_id))
                .unwrap_or(false),
            None => false,
        }
    }

    /// The up-to-`count` nodes closest to `target`, across all buckets.
    /// A full linear scan is fine here: the table never holds more than
    /// `160 * k` entries.
    pub fn closest_nodes(&self, target: &NodeId, count: usize) -> Vec<NodeDescriptor> {
        let mut all: Vec<NodeDescriptor> = Vec::new();
        for entry in self.buckets.iter() {
            all.extend(entry.value().lock().unwrap().nodes());
        }
        all.sort_by_key(|n| meshcas_core::ids::distance(&n.node_id, target).0);
        all.truncate(count);
        all
    }

    pub fn all_nodes(&self) -> Vec<NodeDescriptor> {
        let mut all = Vec::new();
        for entry in self.buckets.iter() {
            all.extend(entry.value().lock().unwrap().nodes());
        }
        all
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|e| e.value().lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of buckets whose contents haven't been touched within
    /// `refresh_interval_secs`. An external scheduler decides what to do
    /// with this (e.g. issue a FIND_NODE for a random id in range).
    pub fn stale_bucket_indices(&self, refresh_interval_secs: u64) -> Vec<usize> {
        self.buckets
            .iter()
            .filter(|e| e.value().lock().unwrap().is_stale(refresh_interval_secs))
            .map(|e| *e.key())
            .collect()
    }

    /// Snapshot of bucket occupancy for status reporting, as `(bucket_index, node_count)`.
    pub fn occupancy(&self) -> Vec<(usize, usize)> {
        let mut out: Vec<(usize, usize)> = self
            .buckets
            .iter()
            .filter(|e| !e.value().lock().unwrap().is_empty())
            .map(|e| (*e.key(), e.value().lock().unwrap().len()))
            .collect();
        out.sort_by_key(|(idx, _)| *idx);
        out
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(seed: &str) -> NodeDescriptor {
        NodeDescriptor {
            node_id: meshcas_core::ids::generate_id(Some(seed)),
            ip: "127.0.0.1".into(),
            dht_port: 9000,
            chunk_port: 9001,
        }
    }

    #[test]
    fn never_inserts_local_node() {
        let local = meshcas_core::ids::generate_id(Some("me"));
        let table = RoutingTable::new(local, 20);
        let me = NodeDescriptor { node_id: local, ip: "127.0.0.1".into(), dht_port: 1, chunk_port: 2 };
        assert_eq!(table.insert(me), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn insert_routes_to_correct_bucket_index() {
        let local = meshcas_core::ids::generate_id(Some("me"));
        let table = RoutingTable::new(local, 20);
        let remote = node("peer-1");
        let expected_idx = meshcas_core::ids::bucket_index(&local, &remote.node_id).unwrap();
        table.insert(remote.clone());
        let bucket = table.buckets.get(&expected_idx).unwrap();
        assert!(bucket.lock().unwrap().contains(&remote.node_id));
    }

    #[test]
    fn bucket_capacity_and_no_duplicates() {
        let mut bucket = KBucket::new(2);
        assert_eq!(bucket.insert(node("a")), InsertOutcome::Inserted);
        assert_eq!(bucket.insert(node("b")), InsertOutcome::Inserted);
        match bucket.insert(node("c")) {
            InsertOutcome::BucketFull { .. } => {}
            _ => panic!("expected bucket full"),
        }
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn reinserting_moves_to_tail() {
        let mut bucket = KBucket::new(3);
        bucket.insert(node("a"));
        bucket.insert(node("b"));
        bucket.insert(node("a"));
        let ids: Vec<_> = bucket.nodes().into_iter().map(|n| n.node_id).collect();
        assert_eq!(ids.last().unwrap(), &node("a").node_id);
    }

    #[test]
    fn remove_promotes_from_replacement_cache() {
        let mut bucket = KBucket::new(1);
        bucket.insert(node("a"));
        bucket.insert(node("b")); // goes to replacement cache
        assert!(bucket.remove(&node("a").node_id));
        assert!(bucket.contains(&node("b").node_id));
    }

    #[test]
    fn closest_nodes_sorted_by_distance() {
        let local = meshcas_core::ids::generate_id(Some("me"));
        let table = RoutingTable::new(local, 20);
        for seed in ["p1", "p2", "p3", "p4"] {
            table.insert(node(seed));
        }
        let target = meshcas_core::ids::generate_id(Some("target"));
        let closest = table.closest_nodes(&target, 2);
        assert_eq!(closest.len(), 2);
        let d0 = meshcas_core::ids::distance(&closest[0].node_id, &target).0;
        let d1 = meshcas_core::ids::distance(&closest[1].node_id, &target).0;
        assert!(d0 <= d1);
    }
}
