//! Overlay configuration

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use veilmesh_crypto::constants::MAX_ONION_LAYERS;

/// Default bind port for both the TCP and UDP sockets
pub const DEFAULT_PORT: u16 = 3000;

/// Default peer cap for the unstructured mesh
pub const DEFAULT_MAX_PEERS: usize = 8;

/// Default cap on live circuits
pub const DEFAULT_MAX_CIRCUITS: usize = 32;

/// Overlay node configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// UDP and TCP bind port
    pub port: u16,

    /// Kademlia bucket size
    pub k: usize,

    /// DHT lookup parallelism
    pub alpha: usize,

    /// Hops per circuit
    pub circuit_length: usize,

    /// Upper bound of the inbound mixing delay (milliseconds)
    pub mixing_delay_max_ms: u64,

    /// Emit periodic dummy traffic
    pub cover_traffic_enabled: bool,

    /// Maximum live circuits before LRU eviction
    pub max_circuits: usize,

    /// Mesh topology
    #[serde(flatten)]
    pub mesh: MeshConfig,
}

/// Mesh topology selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "mesh_type", rename_all = "lowercase")]
pub enum MeshConfig {
    /// Flat gossip mesh with a peer cap
    Unstructured {
        /// Maximum concurrent peer connections
        max_peer_connections: usize,
    },
    /// Supernode-backed mesh
    Structured {
        /// This node's role
        role: MeshRole,
        /// Supernode endpoints, dialed by leaves at startup
        supernode_list: Vec<SocketAddr>,
    },
}

/// Role within a structured mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshRole {
    /// Hub accepting leaf connections without the peer cap
    Supernode,
    /// Edge node dialing into supernodes
    Leaf,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            k: veilmesh_dht::K,
            alpha: veilmesh_dht::ALPHA,
            circuit_length: 3,
            mixing_delay_max_ms: 100,
            cover_traffic_enabled: true,
            max_circuits: DEFAULT_MAX_CIRCUITS,
            mesh: MeshConfig::Unstructured {
                max_peer_connections: DEFAULT_MAX_PEERS,
            },
        }
    }
}

impl OverlayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.circuit_length == 0 {
            return Err("circuit length must be at least 1".into());
        }
        if self.circuit_length > MAX_ONION_LAYERS {
            return Err(format!(
                "circuit length {} exceeds maximum {}",
                self.circuit_length, MAX_ONION_LAYERS
            ));
        }
        if self.k == 0 {
            return Err("k must be at least 1".into());
        }
        if self.alpha == 0 {
            return Err("alpha must be at least 1".into());
        }
        if let MeshConfig::Structured {
            role: MeshRole::Leaf,
            supernode_list,
        } = &self.mesh
        {
            if supernode_list.is_empty() {
                return Err("leaf role requires at least one supernode".into());
            }
        }
        Ok(())
    }

    /// Peer cap, if this topology has one
    pub fn max_peers(&self) -> Option<usize> {
        match &self.mesh {
            MeshConfig::Unstructured {
                max_peer_connections,
            } => Some(*max_peer_connections),
            MeshConfig::Structured { .. } => None,
        }
    }
}
