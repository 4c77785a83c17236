//! DHT set/get across a small bootstrapped network (scenario S5,
//! testable properties 8 and 9).

use crate::{start_node, start_node_bootstrapped_to};

#[tokio::test]
async fn three_node_set_get_converges() {
    let seed = start_node().await;
    let b = start_node_bootstrapped_to(&seed).await;
    let c = start_node_bootstrapped_to(&seed).await;

    // Give b and c a chance to learn about each other via the seed's
    // routing table before the lookup runs.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let stored = seed
        .dht
        .set("hello", serde_json::json!("world"))
        .await;
    assert!(stored, "set should place the value on at least one node");

    let got = c.dht.get("hello").await;
    assert_eq!(got, Some(serde_json::json!("world")));

    let got_from_b = b.dht.get("hello").await;
    assert_eq!(got_from_b, Some(serde_json::json!("world")));
}

#[tokio::test]
async fn five_node_network_replicates_a_value() {
    let seed = start_node().await;
    let mut peers = Vec::new();
    for _ in 0..4 {
        peers.push(start_node_bootstrapped_to(&seed).await);
    }
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    assert!(seed.dht.set("replicated-key", serde_json::json!(42)).await);

    for peer in &peers {
        let got = peer.dht.get("replicated-key").await;
        assert_eq!(got, Some(serde_json::json!(42)), "every node should resolve the key");
    }
}

#[tokio::test]
async fn manifest_key_overwrites_on_republish() {
    let seed = start_node().await;
    let other = start_node_bootstrapped_to(&seed).await;
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    let key = meshcas_core::wire::manifest_key("deadbeef");
    assert!(seed.dht.set(&key, serde_json::json!({"v": 1})).await);
    assert!(seed.dht.set(&key, serde_json::json!({"v": 2})).await);

    let got = other.dht.get(&key).await.unwrap();
    assert_eq!(got, serde_json::json!({"v": 2}));
}

#[tokio::test]
async fn chunk_holder_key_merges_across_publishers() {
    let seed = start_node().await;
    let publisher_a = start_node_bootstrapped_to(&seed).await;
    let publisher_b = start_node_bootstrapped_to(&seed).await;
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    let chunk_hash = "a".repeat(64); // not manifest-prefixed -> chunk-holder key
    assert!(publisher_a.peers.publish_chunk_holder(&chunk_hash).await);
    assert!(publisher_b.peers.publish_chunk_holder(&chunk_hash).await);

    let holders = seed.peers.find_chunk_holder(&chunk_hash).await;
    assert_eq!(holders.len(), 2, "both publishers should appear as holders");

    let ids: std::collections::HashSet<_> = holders.iter().map(|h| h.node_id).collect();
    assert!(ids.contains(&publisher_a.local().node_id));
    assert!(ids.contains(&publisher_b.local().node_id));
}
