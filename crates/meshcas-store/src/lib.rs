//! meshcas-store — stateful data structures shared by the daemon: the
//! content-addressed chunk store, the Kademlia routing table, and the
//! local DHT key/value overlay. No networking lives here; everything in
//! this crate is synchronous and testable without sockets.

pub mod cas;
pub mod dht_storage;
pub mod routing;

pub use cas::{Cas, CasError, ChunkCache, IntegrityReport};
pub use dht_storage::DhtStorage;
pub use routing::{now_secs, InsertOutcome, KBucket, RoutingTable};
