//! Node Identity Management
//!
//! Each node has:
//! - A signing keypair (Ed25519) from which the NodeId is derived
//! - An encryption keypair (X25519) for envelope layers
//! - A random pseudonym tag, unlinked to any network address
//! - A table of capped ephemeral signing keys
//!
//! Ephemeral keys are handed out as opaque handles and destroyed when
//! they exceed their usage or age cap.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::constants::{NODE_ID_SIZE, PSEUDONYM_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyPair, PublicKey};

/// Maximum signatures a single ephemeral key may produce
pub const EPHEMERAL_MAX_USES: u32 = 100;

/// Maximum age of an ephemeral key
pub const EPHEMERAL_MAX_AGE: Duration = Duration::from_secs(3600);

/// A 160-bit node identifier, rendered as 40 lowercase hex chars on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    bytes: [u8; NODE_ID_SIZE],
}

/// A random stable tag by which a node is known at the application layer
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pseudonym {
    bytes: [u8; PSEUDONYM_SIZE],
}

/// Opaque handle to an ephemeral signing key held inside an [`Identity`]
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct EphemeralHandle(String);

/// An ephemeral signing key with its usage bookkeeping
struct EphemeralEntry {
    key: SigningKey,
    created: Instant,
    uses: u32,
}

impl EphemeralEntry {
    fn within_caps(&self) -> bool {
        self.uses <= EPHEMERAL_MAX_USES && self.created.elapsed() <= EPHEMERAL_MAX_AGE
    }
}

/// A node's complete identity
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    /// Ed25519 signing key (NodeId derivation)
    #[zeroize(skip)]
    signing_key: SigningKey,

    /// X25519 encryption keypair (envelope peeling)
    #[zeroize(skip)]
    encryption_keypair: KeyPair,

    /// Cached node ID
    #[zeroize(skip)]
    node_id: NodeId,

    /// Pseudonym tag
    #[zeroize(skip)]
    pseudonym: Pseudonym,

    /// Live ephemeral keys by handle
    #[zeroize(skip)]
    ephemeral: Mutex<HashMap<EphemeralHandle, EphemeralEntry>>,
}

impl NodeId {
    /// Create a NodeId from raw bytes
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a uniformly random NodeId
    pub fn random() -> Self {
        let mut bytes = [0u8; NODE_ID_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Derive a NodeId from a public signing key (truncated BLAKE3 hash)
    pub fn from_pubkey(pubkey: &[u8; 32]) -> Self {
        let hash = blake3::hash(pubkey);
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes.copy_from_slice(&hash.as_bytes()[..NODE_ID_SIZE]);
        Self { bytes }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.bytes
    }

    /// XOR distance to another id, compared as a big-endian unsigned integer
    pub fn distance(&self, other: &NodeId) -> [u8; NODE_ID_SIZE] {
        let mut result = [0u8; NODE_ID_SIZE];
        for i in 0..NODE_ID_SIZE {
            result[i] = self.bytes[i] ^ other.bytes[i];
        }
        result
    }

    /// Number of leading zero bits in the XOR distance (160 iff equal)
    pub fn leading_zeros(&self, other: &NodeId) -> u32 {
        let distance = self.distance(other);
        let mut zeros = 0u32;
        for byte in distance {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// Convert to the 40-char hex wire form
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse the hex wire form
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| CryptoError::SerializationError("invalid hex node id".into()))?;
        if bytes.len() != NODE_ID_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: NODE_ID_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; NODE_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self { bytes: arr })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Pseudonym {
    /// Generate a random pseudonym tag
    pub fn random() -> Self {
        let mut bytes = [0u8; PSEUDONYM_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; PSEUDONYM_SIZE]) -> Self {
        Self { bytes }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; PSEUDONYM_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.bytes))
    }
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let encryption_keypair = KeyPair::generate();
        let node_id = NodeId::from_pubkey(&signing_key.verifying_key().to_bytes());

        Self {
            signing_key,
            encryption_keypair,
            node_id,
            pseudonym: Pseudonym::random(),
            ephemeral: Mutex::new(HashMap::new()),
        }
    }

    /// Get the node's unique identifier
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Get the node's pseudonym tag
    pub fn pseudonym(&self) -> Pseudonym {
        self.pseudonym
    }

    /// Get the X25519 public key for encryption
    pub fn public_key(&self) -> PublicKey {
        self.encryption_keypair.public
    }

    /// Get the X25519 keypair for envelope peeling
    pub fn encryption_keypair(&self) -> &KeyPair {
        &self.encryption_keypair
    }

    /// Mint a fresh ephemeral signing key and return its handle
    pub fn new_ephemeral(&self) -> EphemeralHandle {
        let mut tag = [0u8; 8];
        OsRng.fill_bytes(&mut tag);
        let handle = EphemeralHandle(hex::encode(tag));

        let entry = EphemeralEntry {
            key: SigningKey::generate(&mut OsRng),
            created: Instant::now(),
            uses: 0,
        };

        self.ephemeral
            .lock()
            .expect("ephemeral table poisoned")
            .insert(handle.clone(), entry);
        handle
    }

    /// Sign SHA-256(msg) with an ephemeral key, returning base64
    ///
    /// The use counter is incremented first; a key that then violates its
    /// cap is destroyed and the call fails.
    pub fn sign(&self, msg: &[u8], handle: &EphemeralHandle) -> CryptoResult<String> {
        let mut table = self.ephemeral.lock().expect("ephemeral table poisoned");
        let entry = table
            .get_mut(handle)
            .ok_or(CryptoError::UnknownEphemeralKey)?;

        entry.uses += 1;
        if !entry.within_caps() {
            table.remove(handle);
            return Err(CryptoError::EphemeralKeyExpired);
        }

        let digest: [u8; 32] = Sha256::digest(msg).into();
        let sig = entry.key.sign(&digest);
        Ok(general_purpose::STANDARD.encode(sig.to_bytes()))
    }

    /// Verifying key bytes of a live ephemeral key
    pub fn ephemeral_public(&self, handle: &EphemeralHandle) -> CryptoResult<[u8; 32]> {
        let table = self.ephemeral.lock().expect("ephemeral table poisoned");
        let entry = table.get(handle).ok_or(CryptoError::UnknownEphemeralKey)?;
        Ok(entry.key.verifying_key().to_bytes())
    }

    /// Prove ownership of the pseudonym for a given challenge
    pub fn prove(&self, challenge: &[u8]) -> [u8; 32] {
        prove_with(&self.pseudonym, challenge)
    }

    #[cfg(test)]
    pub(crate) fn backdate_ephemeral(&self, handle: &EphemeralHandle, age: Duration) {
        let mut table = self.ephemeral.lock().expect("ephemeral table poisoned");
        if let Some(entry) = table.get_mut(handle) {
            if let Some(created) = Instant::now().checked_sub(age) {
                entry.created = created;
            }
        }
    }
}

/// Compute the proof digest for a pseudonym and challenge
pub fn prove_with(pseudonym: &Pseudonym, challenge: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pseudonym.as_bytes());
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Constant-time verification of a pseudonym proof
///
/// Never short-circuits on the first differing byte.
pub fn verify_proof(proof: &[u8], challenge: &[u8], pseudonym: &Pseudonym) -> bool {
    let expected = prove_with(pseudonym, challenge);
    if proof.len() != expected.len() {
        return false;
    }
    bool::from(proof.ct_eq(&expected))
}
