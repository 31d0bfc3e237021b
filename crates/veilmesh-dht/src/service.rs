//! DHT UDP Service
//!
//! Owns the datagram socket shared with the overlay's NAT-punch
//! facility: only this service reads from it, and NAT_PUNCH_ACK frames
//! are routed to installed one-shot waiters before normal dispatch.
//!
//! Query frames carry a random `qid`; a lookup resolves only when the
//! matching FOUND/NODES/PONG arrives, never on send success.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, trace, warn};

use veilmesh_crypto::{NodeId, PublicKey};

use crate::contact::Contact;
use crate::error::{DhtError, DhtResult};
use crate::protocol::{new_query_id, Frame, QueryId};
use crate::routing::RoutingTable;
use crate::storage::{key_hash, StorageMap};
use crate::{ALPHA, K, NAT_PUNCH_TIMEOUT_SECS, QUERY_TIMEOUT_SECS};

/// Tuning knobs for the DHT service
#[derive(Clone, Debug)]
pub struct DhtConfig {
    /// Bucket size
    pub k: usize,
    /// Lookup parallelism
    pub alpha: usize,
    /// FIND_VALUE / PING expiry
    pub query_timeout: Duration,
    /// NAT punch expiry
    pub punch_timeout: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: K,
            alpha: ALPHA,
            query_timeout: Duration::from_secs(QUERY_TIMEOUT_SECS),
            punch_timeout: Duration::from_secs(NAT_PUNCH_TIMEOUT_SECS),
        }
    }
}

/// The DHT node service
#[derive(Clone)]
pub struct DhtService {
    /// Shared UDP socket (sole reader: our receive loop)
    socket: Arc<UdpSocket>,
    /// Our node id
    node_id: NodeId,
    /// Our encryption key, announced in PING/PONG
    public_key: PublicKey,
    /// Routing table
    table: Arc<RwLock<RoutingTable>>,
    /// Local value store
    storage: Arc<RwLock<StorageMap>>,
    /// Outstanding queries by qid
    pending: Arc<RwLock<HashMap<QueryId, oneshot::Sender<Frame>>>>,
    /// One-shot NAT punch waiters by exact remote endpoint
    punch_waiters: Arc<RwLock<HashMap<SocketAddr, oneshot::Sender<()>>>>,
    /// Configuration
    config: DhtConfig,
    /// Receive loop running?
    running: Arc<AtomicBool>,
}

impl DhtService {
    /// Bind the UDP socket and create the service
    pub async fn bind(
        node_id: NodeId,
        public_key: PublicKey,
        bind_addr: SocketAddr,
        config: DhtConfig,
    ) -> DhtResult<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!("DHT listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            node_id,
            public_key,
            table: Arc::new(RwLock::new(RoutingTable::with_k(node_id, config.k))),
            storage: Arc::new(RwLock::new(StorageMap::new())),
            pending: Arc::new(RwLock::new(HashMap::new())),
            punch_waiters: Arc::new(RwLock::new(HashMap::new())),
            config,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Our node id
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Local socket address
    pub fn local_addr(&self) -> DhtResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Start the receive loop
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 65536];
            while service.running.load(Ordering::SeqCst) {
                match service.socket.recv_from(&mut buf).await {
                    Ok((len, from)) => service.handle_datagram(&buf[..len], from).await,
                    Err(e) => {
                        if service.running.load(Ordering::SeqCst) {
                            warn!("DHT socket error: {}", e);
                        }
                        break;
                    }
                }
            }
        });
    }

    /// Stop the receive loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Handle one inbound datagram; malformed frames are dropped silently
    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let frame = match Frame::from_bytes(data) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("dropping malformed frame from {}: {}", from, e);
                return;
            }
        };

        // Every valid frame is a sighting of its sender
        if let Some(sender) = frame.sender_id() {
            if sender != self.node_id {
                self.table.write().await.observe(sender, from);
            }
        }

        match frame {
            Frame::Ping {
                node_id,
                qid,
                public_key,
            } => {
                if let Some(pk) = public_key {
                    self.table.write().await.record_key(&node_id, pk);
                }
                self.send_frame(
                    &Frame::Pong {
                        node_id: self.node_id,
                        qid,
                        public_key: Some(self.public_key),
                    },
                    from,
                )
                .await;
            }

            Frame::Pong {
                node_id,
                qid,
                public_key,
            } => {
                if let Some(pk) = public_key {
                    self.table.write().await.record_key(&node_id, pk);
                }
                self.resolve_pending(
                    qid,
                    Frame::Pong {
                        node_id,
                        qid,
                        public_key,
                    },
                )
                .await;
            }

            Frame::Store { key, value, .. } => {
                self.storage.write().await.put(key, value);
            }

            Frame::FindValue { key, qid, .. } => {
                let local = self.storage.read().await.get(&key);
                let reply = match local {
                    Some(value) => Frame::Found {
                        node_id: self.node_id,
                        qid,
                        value,
                    },
                    None => {
                        let contacts = self
                            .table
                            .read()
                            .await
                            .closest(&key, self.config.k)
                            .iter()
                            .map(Contact::to_info)
                            .collect();
                        Frame::Nodes {
                            node_id: self.node_id,
                            qid,
                            contacts,
                        }
                    }
                };
                self.send_frame(&reply, from).await;
            }

            Frame::Found { node_id, qid, value } => {
                self.resolve_pending(qid, Frame::Found { node_id, qid, value })
                    .await;
            }

            Frame::Nodes {
                node_id,
                qid,
                contacts,
            } => {
                // Learn the returned contacts before resolving the waiter
                {
                    let mut table = self.table.write().await;
                    for info in &contacts {
                        if info.node_id == self.node_id {
                            continue;
                        }
                        table.observe(info.node_id, info.address);
                        if let Some(pk) = info.public_key {
                            table.record_key(&info.node_id, pk);
                        }
                    }
                }
                self.resolve_pending(
                    qid,
                    Frame::Nodes {
                        node_id,
                        qid,
                        contacts,
                    },
                )
                .await;
            }

            Frame::NatPunch { .. } => {
                self.send_frame(
                    &Frame::NatPunchAck {
                        node_id: self.node_id,
                    },
                    from,
                )
                .await;
            }

            Frame::NatPunchAck { .. } => {
                // Routed to its waiter before (instead of) any dispatch
                if let Some(waiter) = self.punch_waiters.write().await.remove(&from) {
                    let _ = waiter.send(());
                } else {
                    trace!("unsolicited NAT_PUNCH_ACK from {}", from);
                }
            }

            Frame::Unknown => {
                trace!("dropping frame with unknown type from {}", from);
            }
        }
    }

    async fn resolve_pending(&self, qid: QueryId, frame: Frame) {
        if let Some(waiter) = self.pending.write().await.remove(&qid) {
            let _ = waiter.send(frame);
        } else {
            trace!("no pending query for qid {}", qid);
        }
    }

    /// Best-effort frame send; handler-local failures never propagate
    async fn send_frame(&self, frame: &Frame, to: SocketAddr) {
        match frame.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    debug!("failed to send frame to {}: {}", to, e);
                }
            }
            Err(e) => debug!("failed to encode frame: {}", e),
        }
    }

    /// Send a query frame and await its correlated response.
    /// Timeout deallocates the waiter without touching the socket.
    async fn query(&self, frame: Frame, qid: QueryId, to: SocketAddr) -> DhtResult<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(qid, tx);

        let bytes = frame.to_bytes()?;
        if let Err(e) = self.socket.send_to(&bytes, to).await {
            self.pending.write().await.remove(&qid);
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.query_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => {
                self.pending.write().await.remove(&qid);
                Err(DhtError::Timeout)
            }
        }
    }

    /// Probe a peer; `false` on timeout or unexpected reply
    pub async fn ping(&self, to: SocketAddr) -> bool {
        let qid = new_query_id();
        let frame = Frame::Ping {
            node_id: self.node_id,
            qid,
            public_key: Some(self.public_key),
        };

        matches!(self.query(frame, qid, to).await, Ok(Frame::Pong { .. }))
    }

    /// Store a value under `key` locally and on the k closest peers
    pub async fn put(&self, key: &str, value: Value) -> DhtResult<usize> {
        self.put_with_ttl(key, value, Duration::from_secs(crate::DEFAULT_TTL_SECS))
            .await
    }

    /// Store with an explicit local TTL (replicas use the default)
    pub async fn put_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> DhtResult<usize> {
        let hash = key_hash(key);
        self.storage
            .write()
            .await
            .put_with_ttl(hash, value.clone(), ttl);

        let targets = self.table.read().await.closest(&hash, self.config.k);
        let count = targets.len();

        // Parallel fire-and-forget replication
        for target in targets {
            let service = self.clone();
            let value = value.clone();
            tokio::spawn(async move {
                let frame = Frame::Store {
                    node_id: service.node_id,
                    key: hash,
                    value,
                };
                service.send_frame(&frame, target.addr).await;
            });
        }

        debug!("put {} replicated to {} peers", key, count);
        Ok(count)
    }

    /// Retrieve a value: local hit first, then an α-way FIND_VALUE fan-out
    pub async fn get(&self, key: &str) -> DhtResult<Option<Value>> {
        let hash = key_hash(key);

        if let Some(value) = self.storage.read().await.get(&hash) {
            return Ok(Some(value));
        }

        let targets = self.table.read().await.closest(&hash, self.config.alpha);
        if targets.is_empty() {
            return Ok(None);
        }

        let (tx, mut rx) = mpsc::channel(targets.len());
        let query_count = targets.len();

        for target in targets {
            let service = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let qid = new_query_id();
                let frame = Frame::FindValue {
                    node_id: service.node_id,
                    key: hash,
                    qid,
                };
                let result = match service.query(frame, qid, target.addr).await {
                    Ok(Frame::Found { value, .. }) => Some(value),
                    _ => None,
                };
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut answered = 0;
        while let Some(result) = rx.recv().await {
            answered += 1;
            if let Some(value) = result {
                // Cache for the freshness window
                self.storage.write().await.put(hash, value.clone());
                return Ok(Some(value));
            }
            if answered == query_count {
                break;
            }
        }

        Ok(None)
    }

    /// Minimal hole-punch handshake on the shared socket: `true` iff a
    /// NAT_PUNCH_ACK arrives from exactly `target` in time
    pub async fn hole_punch(&self, target: SocketAddr) -> DhtResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.punch_waiters.write().await.insert(target, tx);

        let frame = Frame::NatPunch {
            node_id: self.node_id,
            timestamp: unix_millis(),
        };
        let bytes = frame.to_bytes()?;
        if let Err(e) = self.socket.send_to(&bytes, target).await {
            self.punch_waiters.write().await.remove(&target);
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.punch_timeout, rx).await {
            Ok(Ok(())) => Ok(true),
            _ => {
                self.punch_waiters.write().await.remove(&target);
                Ok(false)
            }
        }
    }

    /// Join via seed endpoints: ping each, then look our own id up so
    /// the NODES replies seed the routing table
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> usize {
        let mut reached = 0;
        for seed in seeds {
            if self.ping(*seed).await {
                reached += 1;

                let qid = new_query_id();
                let frame = Frame::FindValue {
                    node_id: self.node_id,
                    key: self.node_id,
                    qid,
                };
                let _ = self.query(frame, qid, *seed).await;
            } else {
                debug!("bootstrap seed {} unreachable", seed);
            }
        }

        let known = self.table.read().await.len();
        info!("bootstrap done: {}/{} seeds, {} contacts", reached, seeds.len(), known);
        reached
    }

    /// The `count` known contacts closest to `target`
    pub async fn closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        self.table.read().await.closest(target, count)
    }

    /// Look up a single contact
    pub async fn contact(&self, id: &NodeId) -> Option<Contact> {
        self.table.read().await.get(id)
    }

    /// All known contacts
    pub async fn contacts(&self) -> Vec<Contact> {
        self.table.read().await.all_contacts()
    }

    /// Directly seed a contact (bootstrap lists, tests)
    pub async fn record_contact(&self, id: NodeId, addr: SocketAddr, public_key: Option<PublicKey>) {
        let mut table = self.table.write().await;
        table.observe(id, addr);
        if let Some(pk) = public_key {
            table.record_key(&id, pk);
        }
    }

    /// Number of known contacts
    pub async fn contact_count(&self) -> usize {
        self.table.read().await.len()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
