//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key length provided
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication failed or corrupted data)
    #[error("Decryption failed: authentication or integrity check failed")]
    DecryptionFailed,

    /// An onion layer could not be peeled
    #[error("Envelope layer could not be peeled")]
    PeelFailed,

    /// No hops available for envelope construction
    #[error("Circuit must have at least one hop")]
    EmptyCircuit,

    /// Too many onion layers
    #[error("Too many onion layers: maximum is {max}, got {actual}")]
    TooManyLayers { max: usize, actual: usize },

    /// Ephemeral key handle is not registered
    #[error("Unknown ephemeral key handle")]
    UnknownEphemeralKey,

    /// Ephemeral key exceeded its usage or age cap
    #[error("Ephemeral key exceeded its usage or age cap")]
    EphemeralKeyExpired,

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Invalid signature format
    #[error("Invalid signature format")]
    InvalidSignature,

    /// Invalid public key
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
