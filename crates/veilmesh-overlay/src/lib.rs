//! VeilMesh Overlay Node
//!
//! The anonymous overlay: stream-transport peer set, inbound mixing
//! queue, cover traffic, circuit registry, and the dispatch layer that
//! ties the identity, DHT, and onion engine together.

pub mod circuit;
pub mod config;
pub mod cover;
pub mod error;
pub mod events;
pub mod mixer;
pub mod node;
pub mod peers;
pub mod wire;

pub use circuit::{build_circuit, Circuit, CircuitId, CircuitRegistry, CircuitState, HopResolver};
pub use config::{MeshConfig, MeshRole, OverlayConfig};
pub use cover::CoverTraffic;
pub use error::{OverlayError, OverlayResult};
pub use events::{ChannelSink, EventSink, OverlayEvent};
pub use mixer::Mixer;
pub use node::OverlayNode;
pub use peers::{PeerId, PeerSet};
pub use wire::StreamFrame;
