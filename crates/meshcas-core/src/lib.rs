//! meshcas-core — shared types, identifiers, hashing, and wire formats.
//! All other meshcas crates depend on this one.

pub mod config;
pub mod hash;
pub mod ids;
pub mod wire;

pub use hash::{sha256_hex, Sha256Hasher};
pub use ids::{bucket_index, distance, generate_id, NodeId, NODE_ID_BYTES};
