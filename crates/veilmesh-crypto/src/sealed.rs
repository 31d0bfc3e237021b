//! Sealed Envelope Layers
//!
//! The asymmetric primitive under every onion layer: bytes sealed to a
//! relay's public key so that only that relay's secret key opens them.
//!
//! Layer layout: `[throwaway X25519 key][nonce][ChaCha20-Poly1305
//! ciphertext]`. The throwaway key is minted per layer and dropped by
//! the sender as soon as the layer cipher is derived, so two layers
//! addressed to the same relay share nothing observable, and the
//! sender keeps nothing that could re-open a layer later. The layer
//! cipher comes out of HKDF-SHA256 over the agreed secret with a
//! protocol-fixed salt.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};

use crate::constants::{AUTH_TAG_SIZE, NONCE_SIZE, SYMMETRIC_KEY_SIZE, X25519_KEY_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{PublicKey, SecretKey};

/// Fixed bytes a sealed layer adds on top of its plaintext
pub const LAYER_OVERHEAD: usize = X25519_KEY_SIZE + NONCE_SIZE + AUTH_TAG_SIZE;

/// HKDF salt binding layer keys to this protocol
const LAYER_SALT: &[u8] = b"veilmesh-onion-layer";

/// Seal plaintext to a relay
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let throwaway = EphemeralSecret::random_from_rng(OsRng);
    let header = X25519Public::from(&throwaway).to_bytes();

    let recipient_point = X25519Public::from(recipient.to_bytes());
    let agreed = throwaway.diffie_hellman(&recipient_point);
    let cipher = layer_cipher(agreed.as_bytes());

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("layer seal failed".into()))?;

    let mut layer = Vec::with_capacity(LAYER_OVERHEAD + plaintext.len());
    layer.extend_from_slice(&header);
    layer.extend_from_slice(&nonce);
    layer.extend_from_slice(&ciphertext);
    Ok(layer)
}

/// Open a sealed layer with the relay's secret key
pub fn open(secret: &SecretKey, layer: &[u8]) -> CryptoResult<Vec<u8>> {
    if layer.len() < LAYER_OVERHEAD {
        return Err(CryptoError::DecryptionFailed);
    }

    let (header, rest) = layer.split_at(X25519_KEY_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let header_key = PublicKey::try_from_slice(header)?;
    let agreed = secret.agree(&header_key);
    let cipher = layer_cipher(&agreed[..]);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Squeeze an agreed secret into this layer's AEAD cipher
fn layer_cipher(agreed: &[u8]) -> ChaCha20Poly1305 {
    let hkdf = Hkdf::<Sha256>::new(Some(LAYER_SALT), agreed);
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    hkdf.expand(b"layer-key", &mut key)
        .expect("HKDF expand failed");

    ChaCha20Poly1305::new(Key::from_slice(&key))
}
