//! Content hashing primitives for the chunk store.
//!
//! `SHA-256` is the canonical content hash for chunks and files. The
//! incremental [`Sha256Hasher`] wrapper mirrors the shape of the
//! teacher's `blake3`-based incremental hasher: `update` repeatedly,
//! `finalize` once.

use sha2::{Digest, Sha256};

/// An incremental SHA-256 hasher.
#[derive(Default)]
pub struct Sha256Hasher(Sha256);

impl Sha256Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.0.update(data);
        self
    }

    /// Finalize and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }

    /// Finalize and return the raw 32-byte digest.
    pub fn finalize_bytes(self) -> [u8; 32] {
        let out = self.0.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        bytes
    }
}

/// One-shot SHA-256 over a byte slice, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256Hasher::new();
    hasher.update(data);
    hasher.finalize_hex()
}
