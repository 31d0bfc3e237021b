//! VeilMesh Distributed Hash Table
//!
//! Kademlia-style peer discovery and replicated key/value storage over
//! a JSON-framed UDP protocol, including the minimal NAT hole-punch
//! handshake the overlay needs.

pub mod contact;
pub mod error;
pub mod protocol;
pub mod routing;
pub mod service;
pub mod storage;

pub use contact::{Contact, ContactInfo};
pub use error::{DhtError, DhtResult};
pub use protocol::Frame;
pub use routing::RoutingTable;
pub use service::{DhtConfig, DhtService};
pub use storage::{key_hash, StorageEntry, StorageMap};

/// Kademlia K parameter (bucket size)
pub const K: usize = 20;

/// Alpha parameter (lookup parallelism)
pub const ALPHA: usize = 3;

/// Node ID bit length
pub const ID_BITS: usize = 160;

/// Number of buckets
pub const NUM_BUCKETS: usize = ID_BITS;

/// Default TTL for stored values
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Timeout for FIND_VALUE and PING queries
pub const QUERY_TIMEOUT_SECS: u64 = 5;

/// Timeout for the NAT punch handshake
pub const NAT_PUNCH_TIMEOUT_SECS: u64 = 3;
