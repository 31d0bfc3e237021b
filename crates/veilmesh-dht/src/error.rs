//! DHT error types

use thiserror::Error;

/// DHT errors
#[derive(Debug, Error)]
pub enum DhtError {
    /// Value not found
    #[error("Value not found for key")]
    ValueNotFound,

    /// Invalid message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Socket failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Crypto error
    #[error("Crypto error: {0}")]
    Crypto(#[from] veilmesh_crypto::CryptoError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for DHT operations
pub type DhtResult<T> = Result<T, DhtError>;
