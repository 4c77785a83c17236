//! Wire formats shared by the DHT and the chunk-transfer protocol.
//!
//! Both protocols are JSON over a line/datagram framing, per the design:
//! the DHT speaks one JSON object per UDP datagram; chunk transfer speaks
//! one newline-terminated JSON object per request/response, with raw
//! bytes following a `CHUNK_START` header out-of-band.

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum size of a single DHT UDP datagram. Oversized messages are
/// dropped rather than fragmented — there is no reassembly layer.
pub const MAX_DATAGRAM_BYTES: usize = 65535;

/// Default replication/bucket-capacity factor (K in the Kademlia paper).
pub const DEFAULT_K: usize = 20;

/// Default lookup parallelism factor (alpha in the Kademlia paper).
pub const DEFAULT_ALPHA: usize = 3;

/// Default per-RPC timeout.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;

/// A participant's contact information, as carried in every DHT message
/// and in chunk-holder records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub ip: String,
    /// UDP port the DHT listens on.
    pub dht_port: u16,
    /// TCP port the chunk-transfer server listens on.
    pub chunk_port: u16,
}

impl NodeDescriptor {
    pub fn dht_addr(&self) -> String {
        format!("{}:{}", self.ip, self.dht_port)
    }

    pub fn chunk_addr(&self) -> String {
        format!("{}:{}", self.ip, self.chunk_port)
    }
}

// ── DHT RPC envelope ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rpc {
    Ping,
    Store,
    FindNode,
    FindValue,
}

/// The envelope every DHT datagram carries. `payload` is dispatched on
/// `(kind, rpc)` by the caller into one of the typed payload structs
/// below via `serde_json::from_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtMessage {
    pub msg_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub rpc: Rpc,
    pub sender: NodeDescriptor,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message exceeds max datagram size ({0} > {MAX_DATAGRAM_BYTES})")]
    TooLarge(usize),
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DhtMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM_BYTES {
            return Err(WireError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// Request payloads.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeRequest {
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueRequest {
    pub key: String,
}

// Response payloads.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongResponse {
    pub status: String,
}

impl Default for PongResponse {
    fn default() -> Self {
        Self { status: "PONG".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status: String,
}

impl Default for StoreResponse {
    fn default() -> Self {
        Self { status: "stored".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeResponse {
    pub nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueResponse {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

// ── DHT value space ─────────────────────────────────────────────────────────

/// Typed view of a DHT value, dispatched on the shape of the key rather
/// than an explicit wire discriminant: a 64-hex-char key (a chunk's
/// SHA-256) carries [`DhtValue::ChunkHolders`]; anything prefixed
/// `file_manifest:` carries [`DhtValue::FileManifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DhtValue {
    ChunkHolders(Vec<NodeDescriptor>),
    FileManifest {
        manifest: FileManifest,
        publisher: NodeDescriptor,
    },
}

pub const MANIFEST_KEY_PREFIX: &str = "file_manifest:";

pub fn manifest_key(file_hash: &str) -> String {
    format!("{MANIFEST_KEY_PREFIX}{file_hash}")
}

pub fn is_chunk_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit())
}

// ── File manifest ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifest {
    pub file_hash: String,
    pub original_name: String,
    pub size: u64,
    pub chunk_size: u64,
    pub k: usize,
    pub m: usize,
    pub data_chunks: Vec<String>,
    pub parity_chunks: Vec<String>,
    pub stored_at: u64,
    pub last_accessed: u64,
}

// ── Chunk-transfer wire protocol ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferRequest {
    #[serde(rename = "GET_CHUNK")]
    GetChunk { chunk_hash: String },
    #[serde(rename = "LIST_FILES")]
    ListFiles,
    #[serde(rename = "GET_FILE_METADATA")]
    GetFileMetadata { file_hash: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferResponse {
    #[serde(rename = "CHUNK_START")]
    ChunkStart { size: u64 },
    #[serde(rename = "FILE_LIST")]
    FileList { files: Vec<FileManifest> },
    #[serde(rename = "FILE_METADATA")]
    FileMetadata(FileManifest),
    #[serde(rename = "ERROR")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> NodeDescriptor {
        NodeDescriptor {
            node_id: crate::ids::generate_id(Some("test")),
            ip: "127.0.0.1".to_string(),
            dht_port: 9000,
            chunk_port: 9001,
        }
    }

    #[test]
    fn dht_message_round_trips_through_json() {
        let msg = DhtMessage {
            msg_id: "abc-1".into(),
            kind: MessageKind::Request,
            rpc: Rpc::Ping,
            sender: sample_node(),
            payload: serde_json::to_value(PingRequest).unwrap(),
        };
        let encoded = msg.encode().unwrap();
        let decoded = DhtMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.msg_id, "abc-1");
        assert_eq!(decoded.rpc, Rpc::Ping);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let msg = DhtMessage {
            msg_id: "big".into(),
            kind: MessageKind::Request,
            rpc: Rpc::Store,
            sender: sample_node(),
            payload: serde_json::Value::String("x".repeat(MAX_DATAGRAM_BYTES * 2)),
        };
        assert!(matches!(msg.encode(), Err(WireError::TooLarge(_))));
    }

    #[test]
    fn transfer_request_tags_match_spec_names() {
        let req = TransferRequest::GetChunk { chunk_hash: "abc".into() };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "GET_CHUNK");
    }

    #[test]
    fn chunk_key_detection() {
        let hash = crate::hash::sha256_hex(b"hello");
        assert!(is_chunk_key(&hash));
        assert!(!is_chunk_key(&manifest_key(&hash)));
    }
}
