//! Top-level wiring: bind sockets, assemble the CAS / routing table /
//! DHT node / peer manager, and spawn the background tasks that make a
//! `MeshNode` a live participant in the network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshcas_core::config::MeshConfig;
use meshcas_core::ids::generate_id;
use meshcas_core::wire::NodeDescriptor;
use meshcas_store::{Cas, DhtStorage, RoutingTable};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::dht::DhtNode;
use crate::download::{self, DownloadError, DownloadPolicy};
use crate::peer_manager::PeerManager;
use crate::transport::UdpTransport;

/// A running node: every piece of shared state plus the handles of its
/// background tasks. Dropping this does not stop the tasks — callers
/// that need a clean shutdown should abort the handles explicitly (the
/// core has no graceful-shutdown protocol; see spec Non-goals).
pub struct MeshNode {
    pub config: MeshConfig,
    pub cas: Arc<Cas>,
    pub routing: Arc<RoutingTable>,
    pub storage: Arc<DhtStorage>,
    pub dht: Arc<DhtNode>,
    pub peers: Arc<PeerManager>,
    pub dht_addr: SocketAddr,
    pub chunk_addr: SocketAddr,
    pub dht_task: JoinHandle<()>,
    pub transfer_task: JoinHandle<()>,
}

impl MeshNode {
    /// Bind the DHT (UDP) and chunk-transfer (TCP) sockets, build the
    /// node's stateful pieces, and spawn their background loops. Bind
    /// addresses of `0` are honored (ephemeral ports), which is how the
    /// integration tests run several nodes in one process on loopback.
    pub async fn start(config: MeshConfig) -> anyhow::Result<Arc<Self>> {
        let local_id = if config.identity.seed.is_empty() {
            generate_id(None)
        } else {
            generate_id(Some(&config.identity.seed))
        };

        let udp_bind = format!("{}:{}", config.network.dht_bind_ip, config.network.dht_bind_port);
        let transport = Arc::new(UdpTransport::bind(&udp_bind, local_id).await?);
        let dht_addr = transport.local_addr()?;

        let tcp_bind = format!("{}:{}", config.network.tcp_bind_ip, config.network.tcp_bind_port);
        let listener = TcpListener::bind(&tcp_bind).await?;
        let chunk_addr = listener.local_addr()?;

        let local = NodeDescriptor {
            node_id: local_id,
            ip: dht_addr.ip().to_string(),
            dht_port: dht_addr.port(),
            chunk_port: chunk_addr.port(),
        };

        let routing = Arc::new(RoutingTable::new(local_id, config.kademlia.k));
        let storage = Arc::new(DhtStorage::new(config.kademlia.k));
        let cas = Arc::new(Cas::open(&config.storage.dir, config.chunking.chunk_size)?);

        let dht = DhtNode::new(
            local,
            routing.clone(),
            storage.clone(),
            transport,
            config.kademlia.alpha,
            Duration::from_millis(config.kademlia.rpc_timeout_ms),
        );
        let dht_task = dht.spawn_recv_loop();

        let peers = PeerManager::new(dht.clone());

        let cas_for_transfer = cas.clone();
        let transfer_task = tokio::spawn(crate::transfer::serve(cas_for_transfer, listener));

        tracing::info!(node_id = %local_id, %dht_addr, %chunk_addr, "meshcas node started");

        Ok(Arc::new(Self {
            config,
            cas,
            routing,
            storage,
            dht,
            peers,
            dht_addr,
            chunk_addr,
            dht_task,
            transfer_task,
        }))
    }

    pub fn local(&self) -> &NodeDescriptor {
        &self.dht.local
    }

    /// Parse and bootstrap against the configured contacts.
    pub async fn bootstrap(&self) -> bool {
        let contacts: Vec<SocketAddr> = self
            .config
            .network
            .bootstrap
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        if contacts.is_empty() {
            return false;
        }
        self.dht.bootstrap(&contacts).await
    }

    /// Ingest a local file, publish holder records for every chunk it
    /// produced, and publish the manifest itself.
    pub async fn ingest_and_publish(&self, path: &std::path::Path) -> anyhow::Result<meshcas_core::wire::FileManifest> {
        let manifest = self.cas.store_file(path)?;
        for hash in manifest.data_chunks.iter().chain(manifest.parity_chunks.iter()) {
            self.peers.publish_chunk_holder(hash).await;
        }
        self.peers.publish_file_manifest(&manifest).await;
        Ok(manifest)
    }

    pub async fn download(&self, file_hash: &str, out_path: &std::path::Path) -> Result<(), DownloadError> {
        let policy = DownloadPolicy {
            max_concurrency: self.config.download.max_concurrency,
            per_connection_timeout: Duration::from_millis(self.config.download.per_connection_timeout_ms),
            max_retries_per_chunk: self.config.download.max_retries_per_chunk,
        };
        download::download_file(file_hash, out_path, self.cas.clone(), self.peers.clone(), policy).await
    }
}
