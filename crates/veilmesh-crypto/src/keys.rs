//! Relay Key Material
//!
//! Static X25519 keypairs. A relay's public key is what the DHT hands
//! to circuit builders; the matching secret key is the only thing that
//! strips the envelope layer addressed to that relay. Key agreement
//! itself is not exposed here as a general primitive: the one consumer
//! is [`crate::sealed`], which turns the agreed secret straight into a
//! layer cipher.

use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::constants::X25519_KEY_SIZE;
use crate::error::{CryptoError, CryptoResult};

/// A relay's public encryption key
///
/// Travels inside JSON frames as standard base64, next to the relay's
/// hex node id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; X25519_KEY_SIZE]);

/// A relay's secret encryption key
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

/// Secret and public halves together
#[derive(Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl PublicKey {
    /// Wrap raw curve bytes
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key embedded in a larger buffer (layer headers)
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; X25519_KEY_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: X25519_KEY_SIZE,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Raw curve bytes
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }

    /// Copy out the raw curve bytes
    pub fn to_bytes(&self) -> [u8; X25519_KEY_SIZE] {
        self.0
    }

    /// The base64 wire form
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    /// Parse the base64 wire form
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        PublicKey::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Enough to tell keys apart in logs without dumping the point
        write!(f, "PublicKey({}..)", &self.to_base64()[..8])
    }
}

impl SecretKey {
    /// Generate a fresh secret key
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild from exported bytes
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Export raw bytes for storage; handle with care
    pub fn to_bytes(&self) -> [u8; X25519_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// The public half
    pub fn public_key(&self) -> PublicKey {
        PublicKey(X25519Public::from(&self.0).to_bytes())
    }

    /// Agree with the throwaway key found in a layer header
    ///
    /// Only [`crate::sealed`] calls this; the agreed bytes never leave
    /// the crate and are wiped once the layer cipher is derived.
    pub(crate) fn agree(&self, header_key: &PublicKey) -> Zeroizing<[u8; X25519_KEY_SIZE]> {
        let point = X25519Public::from(header_key.0);
        Zeroizing::new(self.0.diffie_hellman(&point).to_bytes())
    }
}

impl KeyPair {
    /// Generate a fresh keypair
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::generate())
    }

    /// Derive the public half from an existing secret
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Rebuild from exported secret bytes
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Self {
        Self::from_secret(SecretKey::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_is_symmetric() {
        // Sender agrees against the relay's static key with a throwaway
        // key; the relay recomputes the same bytes from the header
        let relay = KeyPair::generate();
        let throwaway = KeyPair::generate();

        let sender_side = throwaway.secret.agree(&relay.public);
        let relay_side = relay.secret.agree(&throwaway.public);

        assert_eq!(*sender_side, *relay_side);
    }

    #[test]
    fn test_distinct_relays_distinct_secrets() {
        let throwaway = KeyPair::generate();
        let relay_a = KeyPair::generate();
        let relay_b = KeyPair::generate();

        assert_ne!(
            *throwaway.secret.agree(&relay_a.public),
            *throwaway.secret.agree(&relay_b.public)
        );
    }

    #[test]
    fn test_secret_export_is_stable() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_bytes(keypair.secret.to_bytes());

        assert_eq!(restored.public, keypair.public);
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let keypair = KeyPair::generate();
        let encoded = keypair.public.to_base64();
        let restored = PublicKey::from_base64(&encoded).unwrap();

        assert_eq!(keypair.public, restored);
    }

    #[test]
    fn test_public_key_rejects_bad_base64() {
        assert!(PublicKey::from_base64("not base64!!").is_err());

        // Valid base64 but wrong length
        let short = general_purpose::STANDARD.encode([0u8; 7]);
        assert!(PublicKey::from_base64(&short).is_err());
    }

    #[test]
    fn test_try_from_slice_length_check() {
        assert!(PublicKey::try_from_slice(&[0u8; 31]).is_err());
        assert!(PublicKey::try_from_slice(&[0u8; 32]).is_ok());
    }
}
