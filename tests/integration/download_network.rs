//! End-to-end file ingest, DHT publish, and network download (scenario
//! S6 and testable property 10).

use crate::{start_node, start_node_bootstrapped_to};

#[tokio::test]
async fn downloader_resolves_manifest_and_fetches_from_holder() {
    let seed = start_node().await;
    let holder = start_node_bootstrapped_to(&seed).await;
    let downloader = start_node_bootstrapped_to(&seed).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let manifest = holder.cas.store_bytes(&data, "report.bin").unwrap();
    for hash in manifest.data_chunks.iter().chain(manifest.parity_chunks.iter()) {
        assert!(holder.peers.publish_chunk_holder(hash).await);
    }
    assert!(holder.peers.publish_file_manifest(&manifest).await);

    let out = std::env::temp_dir().join(format!(
        "meshcas-itest-download-{}.bin",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&out);

    downloader
        .download(&manifest.file_hash, &out)
        .await
        .expect("download should succeed");

    let retrieved = std::fs::read(&out).unwrap();
    assert_eq!(retrieved, data);
    let _ = std::fs::remove_file(&out);
}

#[tokio::test]
async fn downloader_falls_back_to_next_peer_on_bad_chunk() {
    let seed = start_node().await;
    let bad_holder = start_node_bootstrapped_to(&seed).await;
    let good_holder = start_node_bootstrapped_to(&seed).await;
    let downloader = start_node_bootstrapped_to(&seed).await;
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;

    let data = b"small file that fits in one chunk, plus a parity chunk".to_vec();
    let manifest = good_holder.cas.store_bytes(&data, "small.bin").unwrap();

    // Corrupt the bad holder's copy of the first data chunk so it
    // serves wrong bytes under the right hash-derived filename.
    let bad_chunk_hash = &manifest.data_chunks[0];
    bad_holder
        .cas
        .chunk_cache()
        .put(bad_chunk_hash, b"corrupted bytes, wrong hash content")
        .unwrap();

    for hash in manifest.data_chunks.iter().chain(manifest.parity_chunks.iter()) {
        // Both holders announce themselves; the bad one is listed first
        // by virtue of publishing first below.
        assert!(bad_holder.peers.publish_chunk_holder(hash).await);
        assert!(good_holder.peers.publish_chunk_holder(hash).await);
    }
    assert!(good_holder.peers.publish_file_manifest(&manifest).await);

    let out = std::env::temp_dir().join(format!(
        "meshcas-itest-fallback-{}.bin",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&out);

    downloader
        .download(&manifest.file_hash, &out)
        .await
        .expect("download should recover via the good holder");

    let retrieved = std::fs::read(&out).unwrap();
    assert_eq!(retrieved, data);
    let _ = std::fs::remove_file(&out);
}
