//! VeilMesh Cryptographic Primitives
//!
//! All cryptographic operations for the VeilMesh overlay:
//! - Relay key material (X25519)
//! - Sealed envelope layers (throwaway-key agreement + ChaCha20-Poly1305
//!   under HKDF-SHA256)
//! - Node identities, pseudonym proofs, capped ephemeral signing keys
//! - Onion envelopes for multi-hop routing

pub mod error;
pub mod identity;
pub mod keys;
pub mod onion;
pub mod sealed;

pub use error::{CryptoError, CryptoResult};
pub use identity::{verify_proof, EphemeralHandle, Identity, NodeId, Pseudonym};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use onion::{peel, wrap, Hop, OnionEnvelope, Peeled};

/// Protocol constants
pub mod constants {
    /// X25519 key size in bytes
    pub const X25519_KEY_SIZE: usize = 32;

    /// ChaCha20-Poly1305 key size
    pub const SYMMETRIC_KEY_SIZE: usize = 32;

    /// ChaCha20-Poly1305 nonce size
    pub const NONCE_SIZE: usize = 12;

    /// Poly1305 authentication tag size
    pub const AUTH_TAG_SIZE: usize = 16;

    /// Node ID size (160 bits)
    pub const NODE_ID_SIZE: usize = 20;

    /// Pseudonym tag size (128 bits)
    pub const PSEUDONYM_SIZE: usize = 16;

    /// Maximum onion layers (hops)
    pub const MAX_ONION_LAYERS: usize = 7;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_crypto_flow() {
        // Three relays, the last one delivers
        let relay1 = Identity::generate();
        let relay2 = Identity::generate();
        let relay3 = Identity::generate();

        let hops = vec![
            Hop {
                node_id: relay1.node_id(),
                public_key: relay1.public_key(),
                addr: "127.0.0.1:7001".parse().unwrap(),
            },
            Hop {
                node_id: relay2.node_id(),
                public_key: relay2.public_key(),
                addr: "127.0.0.1:7002".parse().unwrap(),
            },
            Hop {
                node_id: relay3.node_id(),
                public_key: relay3.public_key(),
                addr: "127.0.0.1:7003".parse().unwrap(),
            },
        ];

        let message = json!("anonymous hello");
        let envelope = wrap(&message, &hops).unwrap();

        let packet2 = match peel(&envelope, &relay1.encryption_keypair().secret).unwrap() {
            Peeled::Forward { packet, .. } => packet,
            Peeled::Deliver { .. } => panic!("relay 1 should forward"),
        };

        let packet3 = match peel(&packet2, &relay2.encryption_keypair().secret).unwrap() {
            Peeled::Forward { packet, .. } => packet,
            Peeled::Deliver { .. } => panic!("relay 2 should forward"),
        };

        match peel(&packet3, &relay3.encryption_keypair().secret).unwrap() {
            Peeled::Deliver { payload, .. } => assert_eq!(payload, message),
            Peeled::Forward { .. } => panic!("relay 3 should deliver"),
        }
    }
}
