//! Routing-table contacts

use std::net::SocketAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use veilmesh_crypto::{NodeId, PublicKey};

/// A known peer: id, UDP endpoint, freshness
///
/// The encryption key is cached when a peer announces it (PING/PONG) or
/// when it arrives inside a NODES contact list; circuit building needs
/// it, plain routing does not.
#[derive(Clone, Debug)]
pub struct Contact {
    /// Peer's node id
    pub node_id: NodeId,

    /// Peer's UDP endpoint
    pub addr: SocketAddr,

    /// Peer's encryption public key, if announced
    pub public_key: Option<PublicKey>,

    /// When we last heard from this peer
    pub last_seen: Instant,
}

impl Contact {
    /// Create a contact observed just now
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self {
            node_id,
            addr,
            public_key: None,
            last_seen: Instant::now(),
        }
    }

    /// Refresh the last-seen timestamp
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Wire projection for NODES contact lists
    pub fn to_info(&self) -> ContactInfo {
        ContactInfo {
            node_id: self.node_id,
            address: self.addr,
            public_key: self.public_key,
        }
    }
}

/// Contact as carried inside NODES frames
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    /// Node id, 40 hex chars
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,

    /// UDP endpoint as "host:port"
    pub address: SocketAddr,

    /// base64 encryption key, when known
    #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none", default)]
    pub public_key: Option<PublicKey>,
}
