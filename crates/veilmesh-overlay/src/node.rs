//! Overlay Node
//!
//! Owns the identity, the DHT service, the circuit registry, the peer
//! set, and the mixing queue, and wires them together: inbound stream
//! frames go through the mixer and are dispatched here; outbound
//! anonymous sends draw relay candidates from the DHT, wrap the payload,
//! and hand the envelope to the entry relay over a one-shot stream.
//!
//! The TCP and UDP sockets share one port number; the UDP side belongs
//! to the DHT service, which also serves this node's NAT punches.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use veilmesh_crypto::{peel, wrap, Hop, Identity, NodeId, Peeled, PublicKey};
use veilmesh_dht::{Contact, DhtConfig, DhtService};

use crate::circuit::{build_circuit, CircuitId, CircuitRegistry, HopResolver};
use crate::config::{MeshConfig, MeshRole, OverlayConfig};
use crate::cover::CoverTraffic;
use crate::error::{OverlayError, OverlayResult};
use crate::events::{EventSink, OverlayEvent};
use crate::mixer::Mixer;
use crate::peers::{PeerId, PeerSet};
use crate::wire::StreamFrame;

/// Depth of the mixer-to-dispatcher channel
const DISPATCH_QUEUE_DEPTH: usize = 256;

/// An anonymous overlay node
pub struct OverlayNode {
    identity: Arc<Identity>,
    config: OverlayConfig,
    dht: DhtService,
    peers: Arc<PeerSet>,
    circuits: Arc<CircuitRegistry>,
    events: Arc<dyn EventSink>,
    mixer: Mixer,
    tcp_addr: SocketAddr,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OverlayNode {
    /// Bind both transports and start all background tasks
    pub async fn start(
        config: OverlayConfig,
        events: Arc<dyn EventSink>,
    ) -> OverlayResult<Arc<Self>> {
        config.validate().map_err(OverlayError::InvalidConfig)?;

        let identity = Arc::new(Identity::generate());

        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let tcp_addr = listener.local_addr()?;

        // The datagram socket shares the stream socket's port number so
        // a contact's observed endpoint serves both transports
        let dht = DhtService::bind(
            identity.node_id(),
            identity.public_key(),
            SocketAddr::new("0.0.0.0".parse().expect("valid addr"), tcp_addr.port()),
            DhtConfig {
                k: config.k,
                alpha: config.alpha,
                ..Default::default()
            },
        )
        .await?;
        dht.start();

        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
        let mixer = Mixer::new(
            Duration::from_millis(config.mixing_delay_max_ms),
            dispatch_tx,
        );
        let peers = PeerSet::new(config.max_peers());
        let circuits = Arc::new(CircuitRegistry::new(config.max_circuits));

        let node = Arc::new(Self {
            identity,
            config,
            dht,
            peers,
            circuits,
            events,
            mixer,
            tcp_addr,
            tasks: Mutex::new(Vec::new()),
        });

        Self::spawn_accept_loop(&node, listener);
        Self::spawn_dispatch_loop(&node, dispatch_rx);
        node.join_mesh().await;

        if node.config.cover_traffic_enabled {
            let handle = CoverTraffic::default().spawn(node.peers.clone());
            node.tasks.lock().expect("task list poisoned").push(handle);
        }

        info!(
            "overlay node {} listening on {}",
            node.identity.node_id(),
            tcp_addr
        );
        Ok(node)
    }

    fn spawn_accept_loop(this: &Arc<Self>, listener: TcpListener) {
        let node = this.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, from)) => {
                        match node.peers.adopt(stream, node.mixer.clone()).await {
                            Ok(peer_id) => node.events.emit(OverlayEvent::PeerConnected(peer_id)),
                            Err(e) => debug!("rejected connection from {}: {}", from, e),
                        }
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        break;
                    }
                }
            }
        });
        this.tasks.lock().expect("task list poisoned").push(handle);
    }

    fn spawn_dispatch_loop(this: &Arc<Self>, mut rx: mpsc::Receiver<(PeerId, StreamFrame)>) {
        let node = this.clone();
        let handle = tokio::spawn(async move {
            while let Some((peer, frame)) = rx.recv().await {
                // A failing handler must never take the node down
                node.dispatch(peer, frame).await;
            }
        });
        this.tasks.lock().expect("task list poisoned").push(handle);
    }

    /// Leaf nodes dial into their supernodes at startup
    async fn join_mesh(&self) {
        if let MeshConfig::Structured {
            role: MeshRole::Leaf,
            supernode_list,
        } = &self.config.mesh
        {
            for addr in supernode_list.clone() {
                match self.peers.connect(addr, self.mixer.clone()).await {
                    Ok(peer_id) => self.events.emit(OverlayEvent::PeerConnected(peer_id)),
                    Err(e) => warn!("failed to reach supernode {}: {}", addr, e),
                }
            }
        }
    }

    /// Handle one frame released by the mixer
    async fn dispatch(&self, peer: PeerId, frame: StreamFrame) {
        match frame {
            StreamFrame::OnionPacket { packet, circuit_id } => {
                match peel(&packet, &self.identity.encryption_keypair().secret) {
                    Ok(Peeled::Forward { next_hop, packet }) => {
                        trace!("relaying envelope toward {}", next_hop);
                        let frame = StreamFrame::OnionPacket { packet, circuit_id };
                        // Off the dispatch loop so a slow connect cannot
                        // stall other frames
                        tokio::spawn(async move {
                            if let Err(e) = send_once(next_hop, &frame).await {
                                debug!("failed to relay envelope to {}: {}", next_hop, e);
                            }
                        });
                    }
                    Ok(Peeled::Deliver { payload, .. }) => {
                        self.events.emit(OverlayEvent::AnonymousMessage(payload));
                    }
                    Err(_) => {
                        // Nothing goes back on the wire about why
                        debug!("dropping unpeelable envelope from peer {}", peer);
                    }
                }
            }

            StreamFrame::DhtQuery { key } => {
                let dht = self.dht.clone();
                tokio::spawn(async move {
                    match dht.get(&key).await {
                        Ok(Some(value)) => debug!("DHT_QUERY for {:?} resolved: {}", key, value),
                        Ok(None) => debug!("DHT_QUERY for {:?} found nothing", key),
                        Err(e) => debug!("DHT_QUERY for {:?} failed: {}", key, e),
                    }
                });
            }

            StreamFrame::PeerDiscovery { contacts } => {
                if contacts.is_empty() {
                    let ours: Vec<_> = self
                        .dht
                        .contacts()
                        .await
                        .iter()
                        .map(Contact::to_info)
                        .take(self.config.k)
                        .collect();
                    if let Err(e) = self
                        .peers
                        .send(peer, StreamFrame::PeerDiscovery { contacts: ours })
                        .await
                    {
                        debug!("failed to answer peer discovery: {}", e);
                    }
                } else {
                    for info in contacts {
                        if info.node_id == self.identity.node_id() {
                            continue;
                        }
                        self.dht
                            .record_contact(info.node_id, info.address, info.public_key)
                            .await;
                    }
                }
            }

            StreamFrame::AnonymousMessage { payload } => {
                self.events.emit(OverlayEvent::AnonymousMessage(payload));
            }

            StreamFrame::DummyTraffic { .. } => {
                trace!("discarding cover traffic from peer {}", peer);
            }

            StreamFrame::Unknown => {
                trace!("discarding unknown frame from peer {}", peer);
            }
        }
    }

    /// Send a payload anonymously through a fresh circuit
    ///
    /// Relay candidates come from `closest` lookups on random keys, so
    /// the same relay may appear more than once.
    pub async fn send_anonymous(&self, payload: Value) -> OverlayResult<CircuitId> {
        let mut candidate_ids = Vec::with_capacity(self.config.circuit_length);
        for _ in 0..self.config.circuit_length {
            let key = NodeId::random();
            if let Some(contact) = self.dht.closest(&key, 1).await.first() {
                candidate_ids.push(contact.node_id);
            }
        }

        let resolver = DhtResolver {
            dht: self.dht.clone(),
        };
        let circuit = build_circuit(&candidate_ids, &resolver).await;

        let entry = match circuit.entry() {
            Some(entry) => entry.clone(),
            None => return Err(OverlayError::NoRelays),
        };

        let envelope = wrap(&payload, &circuit.hops)?;
        let frame = StreamFrame::OnionPacket {
            packet: envelope,
            circuit_id: circuit.id.clone(),
        };

        send_once(entry.addr, &frame).await?;

        let circuit_id = circuit.id.clone();
        self.circuits.insert(circuit).await;

        debug!("anonymous send via circuit {}", &circuit_id[..8]);
        Ok(circuit_id)
    }

    /// Open the NAT toward an endpoint over the shared datagram socket
    pub async fn hole_punch(&self, target: SocketAddr) -> OverlayResult<bool> {
        Ok(self.dht.hole_punch(target).await?)
    }

    /// Dial a long-lived peer connection
    pub async fn connect_peer(&self, addr: SocketAddr) -> OverlayResult<PeerId> {
        let peer_id = self.peers.connect(addr, self.mixer.clone()).await?;
        self.events.emit(OverlayEvent::PeerConnected(peer_id));
        Ok(peer_id)
    }

    /// Our node id
    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    /// Our encryption public key
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Our identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The DHT service (shares our UDP socket)
    pub fn dht(&self) -> &DhtService {
        &self.dht
    }

    /// The peer set
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// The circuit registry
    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    /// Stream listener address
    pub fn local_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Stop background tasks and the DHT receive loop
    pub fn shutdown(&self) {
        self.dht.stop();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for OverlayNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolver backed by the routing table: a candidate resolves iff we
/// know both its endpoint and its announced encryption key
struct DhtResolver {
    dht: DhtService,
}

#[async_trait]
impl HopResolver for DhtResolver {
    async fn resolve(&self, id: &NodeId) -> Option<Hop> {
        let contact = self.dht.contact(id).await?;
        let public_key = contact.public_key?;
        Some(Hop {
            node_id: contact.node_id,
            public_key,
            addr: contact.addr,
        })
    }
}

/// One-shot envelope handoff: connect, write one frame, close
async fn send_once(addr: SocketAddr, frame: &StreamFrame) -> OverlayResult<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&frame.to_line()?).await?;
    stream.shutdown().await?;
    Ok(())
}
