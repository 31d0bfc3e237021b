//! DHT Wire Protocol
//!
//! JSON text frames, UTF-8, one frame per UDP datagram. Every frame
//! carries at minimum `type` and `nodeId` (40 hex chars). Queries carry
//! a random `qid` echoed by their response so that fan-out lookups only
//! resolve on the matching reply.
//!
//! Unknown `type` tags decode to [`Frame::Unknown`] and are dropped at
//! the dispatch point.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veilmesh_crypto::{NodeId, PublicKey};

use crate::contact::ContactInfo;
use crate::error::{DhtError, DhtResult};

/// Correlation id for query/response pairs
pub type QueryId = u64;

/// Mint a fresh query id
pub fn new_query_id() -> QueryId {
    rand::random()
}

/// A DHT protocol frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Frame {
    /// Liveness probe; also announces the sender's encryption key
    #[serde(rename = "PING")]
    Ping {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        qid: QueryId,
        #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none", default)]
        public_key: Option<PublicKey>,
    },

    /// Reply to PING
    #[serde(rename = "PONG")]
    Pong {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        qid: QueryId,
        #[serde(rename = "publicKey", skip_serializing_if = "Option::is_none", default)]
        public_key: Option<PublicKey>,
    },

    /// Replicate a value; fire-and-forget
    #[serde(rename = "STORE")]
    Store {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        key: NodeId,
        value: Value,
    },

    /// Look up a value by key hash
    #[serde(rename = "FIND_VALUE")]
    FindValue {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        key: NodeId,
        qid: QueryId,
    },

    /// Positive FIND_VALUE reply
    #[serde(rename = "FOUND")]
    Found {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        qid: QueryId,
        value: Value,
    },

    /// Negative FIND_VALUE reply: closest contacts instead
    #[serde(rename = "NODES")]
    Nodes {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        qid: QueryId,
        contacts: Vec<ContactInfo>,
    },

    /// NAT hole-punch probe
    #[serde(rename = "NAT_PUNCH")]
    NatPunch {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        timestamp: u64,
    },

    /// Reply to NAT_PUNCH
    #[serde(rename = "NAT_PUNCH_ACK")]
    NatPunchAck {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },

    /// Unrecognized tag; dropped at dispatch
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// Serialize to a JSON datagram
    pub fn to_bytes(&self) -> DhtResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DhtError::Serialization(e.to_string()))
    }

    /// Deserialize from a JSON datagram
    pub fn from_bytes(bytes: &[u8]) -> DhtResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DhtError::InvalidMessage(e.to_string()))
    }

    /// The sender id, when the frame has one
    pub fn sender_id(&self) -> Option<NodeId> {
        match self {
            Frame::Ping { node_id, .. }
            | Frame::Pong { node_id, .. }
            | Frame::Store { node_id, .. }
            | Frame::FindValue { node_id, .. }
            | Frame::Found { node_id, .. }
            | Frame::Nodes { node_id, .. }
            | Frame::NatPunch { node_id, .. }
            | Frame::NatPunchAck { node_id } => Some(*node_id),
            Frame::Unknown => None,
        }
    }
}
