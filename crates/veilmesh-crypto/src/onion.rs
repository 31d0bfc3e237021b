//! Onion Envelope Layer
//!
//! Layered encryption for anonymous routing. Each layer can only be
//! opened by its designated relay, revealing the next hop endpoint and
//! an inner envelope (or, at the final relay, the payload itself). The
//! per-layer asymmetric primitive lives in [`crate::sealed`].
//!
//! Envelopes travel as JSON: `{ ciphertext: base64, next_hop_tag: hex }`.
//! The outermost tag is opaque padding, indistinguishable from the tags
//! at interior layers, so no relay can tell its own position in the
//! circuit.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_ONION_LAYERS;
use crate::error::{CryptoError, CryptoResult};
use crate::identity::NodeId;
use crate::keys::{PublicKey, SecretKey};
use crate::sealed;

/// A single relay position in a circuit
#[derive(Clone, Debug)]
pub struct Hop {
    /// Relay's node id
    pub node_id: NodeId,
    /// Relay's encryption public key
    pub public_key: PublicKey,
    /// Relay's stream endpoint
    pub addr: SocketAddr,
}

/// One layer of a nested envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnionEnvelope {
    /// base64 sealed box openable only by this layer's relay
    pub ciphertext: String,
    /// 128-bit opaque tag; padding at the outermost layer
    pub next_hop_tag: String,
}

/// Plaintext carried inside one layer
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LayerPlain {
    /// Forwarding layer: pass `packet` on to `next_hop`
    Forward {
        next_hop: SocketAddr,
        packet: OnionEnvelope,
    },
    /// Delivery layer: surface the payload
    Deliver { payload: Value, timestamp: u64 },
}

/// Result of peeling one layer
#[derive(Debug)]
pub enum Peeled {
    /// Forward the inner envelope to the next relay
    Forward {
        next_hop: SocketAddr,
        packet: OnionEnvelope,
    },
    /// Terminal layer; surface the payload
    Deliver { payload: Value, timestamp: u64 },
}

/// Wrap a payload for delivery through the given hops, first hop outermost
pub fn wrap(payload: &Value, hops: &[Hop]) -> CryptoResult<OnionEnvelope> {
    if hops.is_empty() {
        return Err(CryptoError::EmptyCircuit);
    }
    if hops.len() > MAX_ONION_LAYERS {
        return Err(CryptoError::TooManyLayers {
            max: MAX_ONION_LAYERS,
            actual: hops.len(),
        });
    }

    // Innermost plaintext is the delivery record
    let mut plain = LayerPlain::Deliver {
        payload: payload.clone(),
        timestamp: unix_millis(),
    };

    // Seal from the last hop inward; each outer layer names the endpoint
    // of the hop whose envelope it contains
    let mut envelope = seal_layer(&hops[hops.len() - 1].public_key, &plain)?;
    for i in (0..hops.len() - 1).rev() {
        plain = LayerPlain::Forward {
            next_hop: hops[i + 1].addr,
            packet: envelope,
        };
        envelope = seal_layer(&hops[i].public_key, &plain)?;
    }

    Ok(envelope)
}

/// Peel one layer with this relay's secret key
///
/// Every failure mode collapses to [`CryptoError::PeelFailed`]; a relay
/// reports nothing on the wire about why a packet was dropped.
pub fn peel(envelope: &OnionEnvelope, secret: &SecretKey) -> CryptoResult<Peeled> {
    let layer = general_purpose::STANDARD
        .decode(&envelope.ciphertext)
        .map_err(|_| CryptoError::PeelFailed)?;

    let plaintext = sealed::open(secret, &layer).map_err(|_| CryptoError::PeelFailed)?;

    match serde_json::from_slice::<LayerPlain>(&plaintext) {
        Ok(LayerPlain::Forward { next_hop, packet }) => Ok(Peeled::Forward { next_hop, packet }),
        Ok(LayerPlain::Deliver { payload, timestamp }) => Ok(Peeled::Deliver { payload, timestamp }),
        Err(_) => Err(CryptoError::PeelFailed),
    }
}

fn seal_layer(pubkey: &PublicKey, plain: &LayerPlain) -> CryptoResult<OnionEnvelope> {
    let bytes =
        serde_json::to_vec(plain).map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    let layer = sealed::seal(pubkey, &bytes)?;

    let mut tag = [0u8; 16];
    OsRng.fill_bytes(&mut tag);

    Ok(OnionEnvelope {
        ciphertext: general_purpose::STANDARD.encode(layer),
        next_hop_tag: hex::encode(tag),
    })
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use serde_json::json;

    fn make_hop(port: u16) -> (Hop, KeyPair) {
        let keypair = KeyPair::generate();
        let hop = Hop {
            node_id: NodeId::random(),
            public_key: keypair.public,
            addr: format!("127.0.0.1:{port}").parse().unwrap(),
        };
        (hop, keypair)
    }

    #[test]
    fn test_single_hop_delivery() {
        let (hop, keys) = make_hop(4001);
        let payload = json!("hello");

        let envelope = wrap(&payload, &[hop]).unwrap();

        match peel(&envelope, &keys.secret).unwrap() {
            Peeled::Deliver { payload: p, timestamp } => {
                assert_eq!(p, payload);
                assert!(timestamp > 0);
            }
            Peeled::Forward { .. } => panic!("single hop must deliver"),
        }
    }

    #[test]
    fn test_three_hop_roundtrip() {
        let (hop0, keys0) = make_hop(4001);
        let (hop1, keys1) = make_hop(4002);
        let (hop2, keys2) = make_hop(4003);

        let payload = json!("hello");
        let envelope = wrap(&payload, &[hop0, hop1.clone(), hop2.clone()]).unwrap();

        // Hop 0 forwards to hop 1
        let inner1 = match peel(&envelope, &keys0.secret).unwrap() {
            Peeled::Forward { next_hop, packet } => {
                assert_eq!(next_hop, hop1.addr);
                packet
            }
            Peeled::Deliver { .. } => panic!("hop 0 must forward"),
        };

        // Hop 1 forwards to hop 2
        let inner2 = match peel(&inner1, &keys1.secret).unwrap() {
            Peeled::Forward { next_hop, packet } => {
                assert_eq!(next_hop, hop2.addr);
                packet
            }
            Peeled::Deliver { .. } => panic!("hop 1 must forward"),
        };

        // Hop 2 delivers
        match peel(&inner2, &keys2.secret).unwrap() {
            Peeled::Deliver { payload: p, .. } => assert_eq!(p, json!("hello")),
            Peeled::Forward { .. } => panic!("hop 2 must deliver"),
        }
    }

    #[test]
    fn test_peel_out_of_order_fails() {
        let (hop0, _keys0) = make_hop(4001);
        let (hop1, keys1) = make_hop(4002);
        let (hop2, _keys2) = make_hop(4003);

        let envelope = wrap(&json!("hello"), &[hop0, hop1, hop2]).unwrap();

        // Second hop's key cannot open the outermost layer
        assert!(matches!(
            peel(&envelope, &keys1.secret),
            Err(CryptoError::PeelFailed)
        ));
    }

    #[test]
    fn test_peel_wrong_key_fails() {
        let (hop, _keys) = make_hop(4001);
        let stranger = KeyPair::generate();

        let envelope = wrap(&json!("hello"), &[hop]).unwrap();
        assert!(matches!(
            peel(&envelope, &stranger.secret),
            Err(CryptoError::PeelFailed)
        ));
    }

    #[test]
    fn test_garbage_envelope_fails() {
        let keys = KeyPair::generate();
        let envelope = OnionEnvelope {
            ciphertext: "!!! not base64 !!!".into(),
            next_hop_tag: hex::encode([0u8; 16]),
        };
        assert!(matches!(
            peel(&envelope, &keys.secret),
            Err(CryptoError::PeelFailed)
        ));
    }

    #[test]
    fn test_empty_circuit_rejected() {
        assert!(matches!(
            wrap(&json!("x"), &[]),
            Err(CryptoError::EmptyCircuit)
        ));
    }

    #[test]
    fn test_too_many_hops_rejected() {
        let hops: Vec<Hop> = (0..MAX_ONION_LAYERS + 1)
            .map(|i| make_hop(5000 + i as u16).0)
            .collect();

        assert!(matches!(
            wrap(&json!("x"), &hops),
            Err(CryptoError::TooManyLayers { .. })
        ));
    }

    #[test]
    fn test_envelope_json_roundtrip() {
        let (hop, _) = make_hop(4001);
        let envelope = wrap(&json!({"k": 1}), &[hop]).unwrap();

        assert_eq!(envelope.next_hop_tag.len(), 32);

        let text = serde_json::to_string(&envelope).unwrap();
        let back: OnionEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_outer_tags_are_random() {
        let (hop, _) = make_hop(4001);
        let a = wrap(&json!("x"), &[hop.clone()]).unwrap();
        let b = wrap(&json!("x"), &[hop]).unwrap();
        assert_ne!(a.next_hop_tag, b.next_hop_tag);
    }
}
