//! Circuit Management
//!
//! A circuit is an ordered list of relays through which an onion-wrapped
//! message travels. The DHT supplies candidate NodeIds; each is resolved
//! to a [`Hop`] through a capability supplied by the overlay node, so the
//! engine never holds a back-reference to its owner.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use veilmesh_crypto::{Hop, NodeId};

/// Circuit identifier: 128 random bits, hex on the wire
pub type CircuitId = String;

/// Mint a fresh circuit id
pub fn new_circuit_id() -> CircuitId {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Hops are being resolved
    Building,
    /// Ready for traffic
    Live,
}

/// A circuit through the overlay
#[derive(Clone)]
pub struct Circuit {
    /// Circuit id
    pub id: CircuitId,
    /// State
    pub state: CircuitState,
    /// Hops in order, first hop is the entry relay
    pub hops: Vec<Hop>,
    /// Creation time
    pub created_at: Instant,
    /// Last time traffic used this circuit
    pub last_used: Instant,
}

impl Circuit {
    /// Number of hops
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Check if the circuit has no hops
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Entry relay
    pub fn entry(&self) -> Option<&Hop> {
        self.hops.first()
    }
}

/// Capability for resolving a NodeId to a circuit hop
#[async_trait]
pub trait HopResolver: Send + Sync {
    /// Resolve one candidate; `None` skips it silently
    async fn resolve(&self, id: &NodeId) -> Option<Hop>;
}

/// Build a circuit from candidate ids
///
/// Candidates that fail to resolve are skipped, so the result may be
/// shorter than requested (possibly empty).
pub async fn build_circuit(ids: &[NodeId], resolver: &dyn HopResolver) -> Circuit {
    let mut circuit = Circuit {
        id: new_circuit_id(),
        state: CircuitState::Building,
        hops: Vec::with_capacity(ids.len()),
        created_at: Instant::now(),
        last_used: Instant::now(),
    };

    for id in ids {
        match resolver.resolve(id).await {
            Some(hop) => circuit.hops.push(hop),
            None => trace!("skipping unresolvable relay {:?}", id),
        }
    }

    circuit.state = CircuitState::Live;
    debug!(
        "built circuit {} with {}/{} hops",
        &circuit.id[..8],
        circuit.hops.len(),
        ids.len()
    );
    circuit
}

/// Registry of live circuits, LRU-capped
pub struct CircuitRegistry {
    circuits: RwLock<HashMap<CircuitId, Circuit>>,
    max_circuits: usize,
}

impl CircuitRegistry {
    /// Create a registry holding at most `max_circuits` live circuits
    pub fn new(max_circuits: usize) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            max_circuits,
        }
    }

    /// Register a circuit, evicting the least-recently-used if full
    pub async fn insert(&self, circuit: Circuit) {
        let mut circuits = self.circuits.write().await;

        if circuits.len() >= self.max_circuits && !circuits.contains_key(&circuit.id) {
            if let Some(oldest) = circuits
                .values()
                .min_by_key(|c| c.last_used)
                .map(|c| c.id.clone())
            {
                circuits.remove(&oldest);
                debug!("evicted circuit {}", &oldest[..8]);
            }
        }

        circuits.insert(circuit.id.clone(), circuit);
    }

    /// Look up a circuit and mark it used
    pub async fn touch(&self, id: &str) -> Option<Circuit> {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.get_mut(id)?;
        circuit.last_used = Instant::now();
        Some(circuit.clone())
    }

    /// Number of live circuits
    pub async fn len(&self) -> usize {
        self.circuits.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.circuits.read().await.is_empty()
    }
}
