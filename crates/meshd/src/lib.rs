//! meshd — the file-sharing daemon: DHT wire protocol, RPC handlers,
//! iterative lookups, peer manager, and the chunk-transfer server and
//! downloader, wired together as a [`MeshNode`].
//!
//! Exposed as a library (in addition to the `meshd` binary) so the
//! in-process integration harness can start several nodes on loopback
//! without the network-namespace tooling the teacher daemon relies on.

pub mod dht;
pub mod download;
pub mod node;
pub mod peer_manager;
pub mod rpc;
pub mod transfer;
pub mod transport;

pub use dht::DhtNode;
pub use download::{DownloadError, DownloadPolicy};
pub use node::MeshNode;
pub use peer_manager::PeerManager;
