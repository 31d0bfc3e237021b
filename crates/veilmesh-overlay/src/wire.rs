//! Overlay Stream Protocol
//!
//! Newline-delimited JSON frames on the TCP transport, one frame per
//! line. The tagged enum is the single decode point; unknown tags fall
//! into [`StreamFrame::Unknown`] and are discarded by the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veilmesh_crypto::OnionEnvelope;
use veilmesh_dht::ContactInfo;

use crate::error::{OverlayError, OverlayResult};

/// A frame on the overlay stream transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum StreamFrame {
    /// One layer of an anonymous message in transit
    #[serde(rename = "ONION_PACKET")]
    OnionPacket {
        packet: OnionEnvelope,
        #[serde(rename = "circuitId")]
        circuit_id: String,
    },

    /// Thin adapter over the DHT retrieve path
    #[serde(rename = "DHT_QUERY")]
    DhtQuery { key: String },

    /// Contact exchange; an empty list is a request
    #[serde(rename = "PEER_DISCOVERY")]
    PeerDiscovery {
        #[serde(default)]
        contacts: Vec<ContactInfo>,
    },

    /// Direct (non-onion) application message
    #[serde(rename = "ANONYMOUS_MESSAGE")]
    AnonymousMessage { payload: Value },

    /// Cover traffic; discarded by recipients
    #[serde(rename = "DUMMY_TRAFFIC")]
    DummyTraffic { data: String, timestamp: u64 },

    /// Unrecognized tag; discarded
    #[serde(other)]
    Unknown,
}

impl StreamFrame {
    /// Encode as one newline-terminated JSON line
    pub fn to_line(&self) -> OverlayResult<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec(self).map_err(|e| OverlayError::Serialization(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode one line (without the trailing newline)
    pub fn from_line(line: &str) -> OverlayResult<Self> {
        serde_json::from_str(line).map_err(|e| OverlayError::Serialization(e.to_string()))
    }
}
