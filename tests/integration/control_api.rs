//! Exercises the control API end to end: start a node, serve the API
//! on an ephemeral port, and drive it with a real HTTP client.

use crate::{ephemeral_port, start_node};
use meshcas_api::ApiState;
use serde::Deserialize;

#[derive(Deserialize)]
struct StatusResponse {
    node_id: String,
    routing_table_size: usize,
}

#[derive(Deserialize)]
struct StoreResponse {
    file_hash: String,
    k: usize,
    m: usize,
}

#[tokio::test]
async fn status_endpoint_reports_a_fresh_node() {
    let node = start_node().await;
    let port = ephemeral_port();
    let state = ApiState::new(node.clone());
    tokio::spawn(meshcas_api::serve(state, port));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let resp: StatusResponse = reqwest::get(format!("http://127.0.0.1:{}/api/status", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp.node_id, node.local().node_id.to_hex());
    assert_eq!(resp.routing_table_size, 0);
}

#[tokio::test]
async fn store_then_retrieve_round_trips_through_the_api() {
    let node = start_node().await;
    let port = ephemeral_port();
    let state = ApiState::new(node.clone());
    tokio::spawn(meshcas_api::serve(state, port));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let base = format!("http://127.0.0.1:{}/api", port);
    let client = reqwest::Client::new();

    let data = b"round trip through the control api".to_vec();
    let part = reqwest::multipart::Part::bytes(data.clone()).file_name("note.txt");
    let form = reqwest::multipart::Form::new().part("file", part);

    let stored: StoreResponse = client
        .post(format!("{base}/store"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored.k, 1);
    assert_eq!(stored.m, 1);

    let out_path = std::env::temp_dir().join(format!(
        "meshcas-itest-api-retrieve-{}.txt",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&out_path);

    let retrieve_req = serde_json::json!({
        "file_hash": stored.file_hash,
        "out_path": out_path.to_str().unwrap(),
    });
    let resp = client
        .post(format!("{base}/retrieve"))
        .json(&retrieve_req)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let retrieved = std::fs::read(&out_path).unwrap();
    assert_eq!(retrieved, data);
    let _ = std::fs::remove_file(&out_path);
}
