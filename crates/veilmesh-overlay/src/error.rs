//! Overlay error types

use thiserror::Error;

/// Overlay errors
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No relays could be resolved for a circuit
    #[error("No relays available for circuit construction")]
    NoRelays,

    /// Peer connection limit reached
    #[error("Peer connection limit reached")]
    PeerLimit,

    /// Unknown peer id
    #[error("Unknown peer: {0}")]
    UnknownPeer(u64),

    /// TCP/UDP failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Crypto failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] veilmesh_crypto::CryptoError),

    /// DHT failure
    #[error("DHT error: {0}")]
    Dht(#[from] veilmesh_dht::DhtError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for overlay operations
pub type OverlayResult<T> = Result<T, OverlayError>;
