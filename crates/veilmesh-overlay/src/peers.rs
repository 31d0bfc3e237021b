//! Peer Connection Set
//!
//! Long-lived stream connections, one per peer id. Each accepted or
//! dialed socket gets a fresh random 64-bit id, a writer task draining
//! an outbound queue, and a reader task feeding parsed frames into the
//! mixing queue. Closing a connection removes the peer exactly once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::error::{OverlayError, OverlayResult};
use crate::mixer::Mixer;
use crate::wire::StreamFrame;

/// Peer identifier assigned on accept/connect
pub type PeerId = u64;

/// Outbound queue depth per peer
const PEER_QUEUE_DEPTH: usize = 64;

struct PeerHandle {
    addr: SocketAddr,
    tx: mpsc::Sender<StreamFrame>,
}

/// The set of live peer connections
pub struct PeerSet {
    peers: RwLock<HashMap<PeerId, PeerHandle>>,
    max_peers: Option<usize>,
}

impl PeerSet {
    /// Create a peer set; `max_peers: None` means uncapped (supernode)
    pub fn new(max_peers: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            peers: RwLock::new(HashMap::new()),
            max_peers,
        })
    }

    /// Take ownership of an established stream: assign a peer id and
    /// spawn its reader/writer tasks
    pub async fn adopt(self: &Arc<Self>, stream: TcpStream, mixer: Mixer) -> OverlayResult<PeerId> {
        let addr = stream.peer_addr()?;

        let peer_id = {
            let mut peers = self.peers.write().await;
            if let Some(max) = self.max_peers {
                if peers.len() >= max {
                    return Err(OverlayError::PeerLimit);
                }
            }

            let mut id: PeerId = rand::thread_rng().gen();
            while peers.contains_key(&id) {
                id = rand::thread_rng().gen();
            }

            let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
            peers.insert(id, PeerHandle { addr, tx });
            spawn_io_tasks(self.clone(), id, stream, rx, mixer);
            id
        };

        debug!("peer {} attached from {}", peer_id, addr);
        Ok(peer_id)
    }

    /// Dial a peer and adopt the connection
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr, mixer: Mixer) -> OverlayResult<PeerId> {
        let stream = TcpStream::connect(addr).await?;
        self.adopt(stream, mixer).await
    }

    /// Queue a frame for a peer
    pub async fn send(&self, peer: PeerId, frame: StreamFrame) -> OverlayResult<()> {
        let tx = {
            let peers = self.peers.read().await;
            peers
                .get(&peer)
                .map(|h| h.tx.clone())
                .ok_or(OverlayError::UnknownPeer(peer))?
        };

        tx.send(frame)
            .await
            .map_err(|_| OverlayError::UnknownPeer(peer))
    }

    /// Pick a live peer uniformly at random
    pub async fn random_peer(&self) -> Option<PeerId> {
        let peers = self.peers.read().await;
        if peers.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..peers.len());
        peers.keys().nth(index).copied()
    }

    /// Remote address of a peer
    pub async fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.read().await.get(&peer).map(|h| h.addr)
    }

    /// Number of live peers
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Check if no peers are connected
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    async fn remove(&self, peer: PeerId) {
        if self.peers.write().await.remove(&peer).is_some() {
            debug!("peer {} removed", peer);
        }
    }
}

/// Spawn the reader and writer tasks for one connection. The reader owns
/// peer removal so close triggers exactly one.
fn spawn_io_tasks(
    set: Arc<PeerSet>,
    peer_id: PeerId,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<StreamFrame>,
    mixer: Mixer,
) {
    let (read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let line = match frame.to_line() {
                Ok(line) => line,
                Err(e) => {
                    debug!("peer {}: failed to encode frame: {}", peer_id, e);
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(&line).await {
                debug!("peer {}: write failed: {}", peer_id, e);
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match StreamFrame::from_line(&line) {
                    Ok(frame) => mixer.enqueue(peer_id, frame),
                    Err(e) => trace!("peer {}: dropping malformed frame: {}", peer_id, e),
                },
                Ok(None) => break,
                Err(e) => {
                    debug!("peer {}: read failed: {}", peer_id, e);
                    break;
                }
            }
        }
        set.remove(peer_id).await;
    });
}
