//! 160-bit node identifiers and the XOR distance metric used by the
//! Kademlia routing table.
//!
//! A [`NodeId`] is a `SHA-1` digest used purely as a uniformly-distributed
//! 160-bit label — it carries no authentication guarantee, the same way
//! the original Kademlia paper treats node IDs as opaque random labels.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Width of a node identifier in bytes (160 bits).
pub const NODE_ID_BYTES: usize = 20;

/// A 160-bit Kademlia node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "hex_bytes")] pub [u8; NODE_ID_BYTES]);

impl NodeId {
    /// Build a `NodeId` from raw bytes.
    pub fn from_bytes(bytes: [u8; NODE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse a 40-character hex string into a `NodeId`.
    pub fn from_hex(s: &str) -> Option<Self> {
        let decoded = hex::decode(s).ok()?;
        let bytes: [u8; NODE_ID_BYTES] = decoded.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Lowercase hex encoding of this id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, for compact log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_BYTES] {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod hex_bytes {
    use super::NODE_ID_BYTES;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; NODE_ID_BYTES], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; NODE_ID_BYTES], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(&s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("node id must be 20 bytes"))
    }
}

/// Derive a [`NodeId`] from a seed string (stable across runs), or from
/// fresh randomness when no seed is given.
pub fn generate_id(seed: Option<&str>) -> NodeId {
    let mut hasher = Sha1::new();
    match seed {
        Some(s) => hasher.update(s.as_bytes()),
        None => {
            let mut entropy = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut entropy);
            hasher.update(entropy);
        }
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; NODE_ID_BYTES];
    bytes.copy_from_slice(&digest);
    NodeId(bytes)
}

/// Hash an arbitrary DHT key string down to a 160-bit lookup target,
/// the same way a foreign key (not already a 40-hex-char id) is
/// projected into the node-id space for `FIND_VALUE` routing.
pub fn key_to_target(key: &str) -> NodeId {
    if key.len() == NODE_ID_BYTES * 2 {
        if let Some(id) = NodeId::from_hex(key) {
            return id;
        }
    }
    generate_id(Some(key))
}

/// XOR distance between two ids, treated as a big-endian unsigned integer
/// for ordering purposes (we never need the integer value itself, only
/// comparisons and the bit length).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; NODE_ID_BYTES]);

pub fn distance(a: &NodeId, b: &NodeId) -> Distance {
    let mut out = [0u8; NODE_ID_BYTES];
    for i in 0..NODE_ID_BYTES {
        out[i] = a.0[i] ^ b.0[i];
    }
    Distance(out)
}

impl Distance {
    /// Number of bits needed to represent this distance, i.e. the index
    /// of the highest set bit plus one. Zero for an all-zero distance.
    pub fn bit_length(&self) -> u32 {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let leading = byte.leading_zeros();
                let byte_bits = 8 - leading;
                return ((NODE_ID_BYTES - i - 1) as u32) * 8 + byte_bits;
            }
        }
        0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// Bucket index for `remote` relative to `local`: `bit_length(distance) - 1`,
/// or `None` when `remote == local` (the local node is never bucketed).
pub fn bucket_index(local: &NodeId, remote: &NodeId) -> Option<usize> {
    let d = distance(local, remote);
    if d.is_zero() {
        return None;
    }
    Some((d.bit_length() - 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_self_distance_zero() {
        let a = generate_id(Some("alice"));
        let b = generate_id(Some("bob"));
        assert_eq!(distance(&a, &b).0, distance(&b, &a).0);
        assert!(distance(&a, &a).is_zero());
    }

    #[test]
    fn seeded_ids_are_deterministic() {
        let a1 = generate_id(Some("alice"));
        let a2 = generate_id(Some("alice"));
        assert_eq!(a1, a2);
    }

    #[test]
    fn bucket_index_none_for_self() {
        let a = generate_id(Some("alice"));
        assert_eq!(bucket_index(&a, &a), None);
    }

    #[test]
    fn bucket_index_matches_bit_length_minus_one() {
        let local = NodeId::from_bytes([0u8; NODE_ID_BYTES]);
        let mut remote_bytes = [0u8; NODE_ID_BYTES];
        remote_bytes[NODE_ID_BYTES - 1] = 0b0000_0001; // distance = 1, bit_length = 1
        let remote = NodeId::from_bytes(remote_bytes);
        assert_eq!(bucket_index(&local, &remote), Some(0));

        let mut remote_bytes2 = [0u8; NODE_ID_BYTES];
        remote_bytes2[0] = 0b1000_0000; // top bit of top byte set
        let remote2 = NodeId::from_bytes(remote_bytes2);
        assert_eq!(bucket_index(&local, &remote2), Some(159));
    }

    #[test]
    fn hex_round_trips() {
        let id = generate_id(Some("carol"));
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(NodeId::from_hex(&hex), Some(id));
    }

    #[test]
    fn key_to_target_hashes_non_hex_keys() {
        let t1 = key_to_target("some-chunk-key");
        let t2 = key_to_target("some-chunk-key");
        assert_eq!(t1, t2);
        let hex_key = generate_id(Some("x")).to_hex();
        assert_eq!(key_to_target(&hex_key), NodeId::from_hex(&hex_key).unwrap());
    }
}
