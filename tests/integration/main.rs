//! In-process integration harness: starts several [`MeshNode`]s on
//! loopback within one test binary, in place of the network-namespace +
//! subprocess harness the teacher's daemon used. Each test module below
//! exercises one of the end-to-end scenarios.

mod control_api;
mod dht_network;
mod download_network;

use std::sync::atomic::{AtomicU64, Ordering};

use meshcas_core::config::MeshConfig;
use meshd::node::MeshNode;

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a config for a loopback-only node: ephemeral ports, a fresh
/// temp storage dir, and a random identity seed so nodes in the same
/// process never collide on id.
pub fn test_config() -> MeshConfig {
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    let mut config = MeshConfig::default();
    config.identity.seed = format!("itest-node-{}-{}", std::process::id(), n);
    config.network.dht_bind_ip = "127.0.0.1".to_string();
    config.network.dht_bind_port = 0;
    config.network.tcp_bind_ip = "127.0.0.1".to_string();
    config.network.tcp_bind_port = 0;
    config.storage.dir = tempfile::Builder::new()
        .prefix("meshcas-itest-")
        .tempdir()
        .unwrap()
        .into_path();
    config.kademlia.rpc_timeout_ms = 2000;
    config
}

pub async fn start_node() -> std::sync::Arc<MeshNode> {
    MeshNode::start(test_config()).await.expect("node should start")
}

pub async fn start_node_bootstrapped_to(
    contact: &std::sync::Arc<MeshNode>,
) -> std::sync::Arc<MeshNode> {
    let mut config = test_config();
    config.network.bootstrap = vec![contact.dht_addr.to_string()];
    let node = MeshNode::start(config).await.expect("node should start");
    assert!(node.bootstrap().await, "bootstrap should reach the seed node");
    node
}

/// Reserve an ephemeral TCP port by binding then immediately dropping a
/// listener. Small race window between reservation and the caller's own
/// bind, acceptable for a test-only helper.
pub fn ephemeral_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
