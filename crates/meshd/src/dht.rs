//! The Kademlia node: iterative FIND_NODE / FIND_VALUE, bootstrap, and
//! the `set`/`get` overlay built on top of them (spec 4.7).
//!
//! Each iterative lookup runs the state machine described in the spec:
//! `Seeded -> Probing -> Converged | ValueFound | Exhausted`. `Seeded`
//! is the initial candidate set pulled from the routing table;
//! `Probing` is the per-round alpha-wide dispatch; a round that
//! discovers no previously-unknown node is `Converged` (`Exhausted` if
//! there was nothing left to query at all).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use meshcas_core::ids::{distance, key_to_target, NodeId};
use meshcas_core::wire::{
    DhtMessage, FindNodeRequest, FindNodeResponse, FindValueRequest, FindValueResponse,
    MessageKind, NodeDescriptor, PingRequest, Rpc, StoreRequest, StoreResponse,
};
use meshcas_store::{DhtStorage, RoutingTable};
use serde_json::Value;
use thiserror::Error;

use crate::rpc;
use crate::transport::UdpTransport;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc timed out")]
    Timeout,
    #[error("invalid address: {0}")]
    BadAddr(#[from] std::net::AddrParseError),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

enum ValueLookup {
    Found(Value),
    NotFound(Vec<NodeDescriptor>),
}

/// Top-level DHT participant: owns the routing table, the local
/// key/value overlay, and the UDP transport used to reach peers.
pub struct DhtNode {
    pub local: NodeDescriptor,
    pub routing: Arc<RoutingTable>,
    pub storage: Arc<DhtStorage>,
    transport: Arc<UdpTransport>,
    k: usize,
    alpha: usize,
    rpc_timeout: Duration,
}

impl DhtNode {
    pub fn new(
        local: NodeDescriptor,
        routing: Arc<RoutingTable>,
        storage: Arc<DhtStorage>,
        transport: Arc<UdpTransport>,
        alpha: usize,
        rpc_timeout: Duration,
    ) -> Arc<Self> {
        let k = routing.k();
        Arc::new(Self { local, routing, storage, transport, k, alpha, rpc_timeout })
    }

    /// Spawn the receive loop that drives this node's side of every RPC
    /// exchange. Runs until the socket errors out.
    pub fn spawn_recv_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match this.transport.recv().await {
                    Ok((msg, from)) => this.clone().on_message(msg, from).await,
                    Err(e) => {
                        tracing::error!(error = %e, "dht socket closed");
                        break;
                    }
                }
            }
        })
    }

    async fn on_message(self: Arc<Self>, msg: DhtMessage, from: SocketAddr) {
        // Every received message offers its sender to the routing table,
        // request or response alike (spec 4.5).
        self.routing.insert(msg.sender.clone());

        match msg.kind {
            MessageKind::Request => {
                if let Some(payload) = rpc::handle_request(&msg, &self.routing, &self.storage) {
                    let response = DhtMessage {
                        msg_id: msg.msg_id,
                        kind: MessageKind::Response,
                        rpc: msg.rpc,
                        sender: self.local.clone(),
                        payload,
                    };
                    let _ = self.transport.send(from, &response).await;
                }
            }
            MessageKind::Response => {
                self.transport.resolve_pending(&msg.msg_id, msg);
            }
        }
    }

    async fn call(&self, to: &NodeDescriptor, rpc: Rpc, payload: Value) -> Result<DhtMessage, RpcError> {
        let addr: SocketAddr = to.dht_addr().parse()?;
        let msg_id = self.transport.next_msg_id();
        let rx = self.transport.register_pending(msg_id.clone());
        let req = DhtMessage {
            msg_id: msg_id.clone(),
            kind: MessageKind::Request,
            rpc,
            sender: self.local.clone(),
            payload,
        };
        self.transport.send(addr, &req).await.ok();
        match tokio::time::timeout(self.rpc_timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            _ => {
                self.transport.cancel_pending(&msg_id);
                Err(RpcError::Timeout)
            }
        }
    }

    pub async fn ping(&self, to: &NodeDescriptor) -> Result<NodeDescriptor, RpcError> {
        let resp = self.call(to, Rpc::Ping, serde_json::to_value(PingRequest).unwrap()).await?;
        Ok(resp.sender)
    }

    async fn find_node_rpc(&self, to: &NodeDescriptor, target: NodeId) -> Result<Vec<NodeDescriptor>, RpcError> {
        let req = FindNodeRequest { target: target.to_hex() };
        let resp = self.call(to, Rpc::FindNode, serde_json::to_value(req).unwrap()).await?;
        let parsed: FindNodeResponse = serde_json::from_value(resp.payload)?;
        Ok(parsed.nodes)
    }

    async fn find_value_rpc(&self, to: &NodeDescriptor, key: &str) -> Result<ValueLookup, RpcError> {
        let req = FindValueRequest { key: key.to_string() };
        let resp = self.call(to, Rpc::FindValue, serde_json::to_value(req).unwrap()).await?;
        let parsed: FindValueResponse = serde_json::from_value(resp.payload)?;
        if parsed.found {
            Ok(ValueLookup::Found(parsed.value.unwrap_or(Value::Null)))
        } else {
            Ok(ValueLookup::NotFound(parsed.nodes))
        }
    }

    /// Ping every bootstrap contact, then run an iterative FIND_NODE for
    /// our own id to seed nearby buckets. Returns true iff at least one
    /// contact answered.
    pub async fn bootstrap(&self, contacts: &[SocketAddr]) -> bool {
        let mut any = false;
        for addr in contacts {
            let stub = NodeDescriptor {
                node_id: NodeId::from_bytes([0u8; meshcas_core::ids::NODE_ID_BYTES]),
                ip: addr.ip().to_string(),
                dht_port: addr.port(),
                chunk_port: 0,
            };
            match self.ping(&stub).await {
                Ok(real) => {
                    tracing::info!(peer = %real.node_id, %addr, "bootstrap contact responded");
                    self.routing.insert(real);
                    any = true;
                }
                Err(e) => tracing::warn!(%addr, error = %e, "bootstrap contact unreachable"),
            }
        }
        if any {
            self.iterative_find_node(self.local.node_id).await;
        }
        any
    }

    /// Convergent search for the k nodes closest to `target`.
    pub async fn iterative_find_node(&self, target: NodeId) -> Vec<NodeDescriptor> {
        let mut candidates = self.routing.closest_nodes(&target, self.k);
        if candidates.is_empty() {
            return Vec::new(); // Exhausted before probing even started.
        }
        let mut queried: HashSet<NodeId> = HashSet::new();

        loop {
            let batch: Vec<NodeDescriptor> = candidates
                .iter()
                .filter(|n| !queried.contains(&n.node_id))
                .take(self.alpha)
                .cloned()
                .collect();
            if batch.is_empty() {
                break; // Exhausted: nothing left to query.
            }
            for n in &batch {
                queried.insert(n.node_id);
            }

            let results = join_all(batch.iter().map(|n| self.find_node_rpc(n, target))).await;
            let mut discovered_new = false;
            for r in results.into_iter().flatten() {
                for node in r {
                    if node.node_id == self.local.node_id {
                        continue;
                    }
                    self.routing.insert(node.clone());
                    if !candidates.iter().any(|c| c.node_id == node.node_id) {
                        candidates.push(node);
                        discovered_new = true;
                    }
                }
            }
            candidates.sort_by_key(|n| distance(&n.node_id, &target).0);

            if !discovered_new {
                break; // Converged.
            }
        }

        candidates.truncate(self.k);
        candidates
    }

    /// Convergent search for a value stored under `key`, checking local
    /// storage first.
    pub async fn iterative_find_value(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.storage.get(key) {
            return Some(v);
        }

        let target = key_to_target(key);
        let mut candidates = self.routing.closest_nodes(&target, self.k);
        if candidates.is_empty() {
            return None; // Exhausted.
        }
        let mut queried: HashSet<NodeId> = HashSet::new();

        loop {
            let batch: Vec<NodeDescriptor> = candidates
                .iter()
                .filter(|n| !queried.contains(&n.node_id))
                .take(self.alpha)
                .cloned()
                .collect();
            if batch.is_empty() {
                return None; // Exhausted.
            }
            for n in &batch {
                queried.insert(n.node_id);
            }

            let results = join_all(batch.iter().map(|n| self.find_value_rpc(n, key))).await;
            let mut discovered_new = false;
            for r in results {
                match r {
                    Ok(ValueLookup::Found(v)) => {
                        self.storage.store(key, v.clone()); // ValueFound: cache locally.
                        return Some(v);
                    }
                    Ok(ValueLookup::NotFound(nodes)) => {
                        for node in nodes {
                            if node.node_id == self.local.node_id {
                                continue;
                            }
                            self.routing.insert(node.clone());
                            if !candidates.iter().any(|c| c.node_id == node.node_id) {
                                candidates.push(node);
                                discovered_new = true;
                            }
                        }
                    }
                    Err(_) => {}
                }
            }
            candidates.sort_by_key(|n| distance(&n.node_id, &target).0);

            if !discovered_new {
                return None; // Converged without a hit.
            }
        }
    }

    /// Hash `key` into the DHT's id space, replicate `value` onto the k
    /// closest nodes, and store locally too if we are among them.
    /// Succeeds if any STORE is acknowledged or the local store ran.
    pub async fn set(&self, key: &str, value: Value) -> bool {
        let target = key_to_target(key);
        let closest = self.iterative_find_node(target).await;

        let mut any_ack = false;
        let results = join_all(closest.iter().map(|n| {
            let req = StoreRequest { key: key.to_string(), value: value.clone() };
            self.call(n, Rpc::Store, serde_json::to_value(req).unwrap())
        }))
        .await;
        for r in results {
            if let Ok(resp) = r {
                if let Ok(sr) = serde_json::from_value::<StoreResponse>(resp.payload) {
                    if sr.status == "stored" {
                        any_ack = true;
                    }
                }
            }
        }

        let mut combined = closest;
        combined.push(self.local.clone());
        combined.sort_by_key(|n| distance(&n.node_id, &target).0);
        combined.truncate(self.k);
        if combined.iter().any(|n| n.node_id == self.local.node_id) {
            self.storage.store(key, value);
            any_ack = true;
        }

        any_ack
    }

    /// Look up `key`, local storage first, DHT lookup otherwise.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.iterative_find_value(key).await
    }
}
