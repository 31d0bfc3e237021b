//! Cover Traffic
//!
//! Periodic dummy frames sent to a random peer so that real envelope
//! traffic does not stand out in volume or timing. Recipients discard
//! DUMMY_TRAFFIC frames without a handler.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::peers::PeerSet;
use crate::wire::StreamFrame;

/// Dummy payload size in bytes
const DUMMY_SIZE: usize = 64;

/// Cover traffic cadence
#[derive(Clone, Debug)]
pub struct CoverTraffic {
    /// Fixed floor between emissions
    pub base: Duration,
    /// Uniform random extra on top of the floor
    pub jitter: Duration,
}

impl Default for CoverTraffic {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            jitter: Duration::from_secs(10),
        }
    }
}

impl CoverTraffic {
    /// Next emission delay: `base + Uniform[0, jitter]`
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base + Duration::from_millis(extra)
    }

    /// Build one dummy frame: 64 random base64 bytes plus a timestamp
    pub fn make_frame(&self) -> StreamFrame {
        let mut data = [0u8; DUMMY_SIZE];
        OsRng.fill_bytes(&mut data);

        StreamFrame::DummyTraffic {
            data: general_purpose::STANDARD.encode(data),
            timestamp: unix_millis(),
        }
    }

    /// Spawn the emission loop; sends to a random peer whenever any exist
    pub fn spawn(self, peers: Arc<PeerSet>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.next_delay()).await;

                if let Some(peer) = peers.random_peer().await {
                    let frame = self.make_frame();
                    if peers.send(peer, frame).await.is_ok() {
                        trace!("cover traffic sent to peer {}", peer);
                    }
                }
            }
        })
    }
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
    use crate::mixer::Mixer;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_delay_within_window() {
        let cadence = CoverTraffic {
            base: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        };

        for _ in 0..50 {
            let delay = cadence.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_dummy_frame_shape() {
        let cadence = CoverTraffic::default();

        match cadence.make_frame() {
            StreamFrame::DummyTraffic { data, timestamp } => {
                let decoded = general_purpose::STANDARD.decode(&data).unwrap();
                assert_eq!(decoded.len(), DUMMY_SIZE);
                assert!(timestamp > 0);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_dummy_frames_differ() {
        let cadence = CoverTraffic::default();
        let a = cadence.make_frame();
        let b = cadence.make_frame();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_emission_loop_sends_to_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sender_set = PeerSet::new(Some(8));
        let receiver_set = PeerSet::new(Some(8));

        let (tx_s, _rx_s) = mpsc::channel(8);
        let (tx_r, mut rx_r) = mpsc::channel(8);

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            stream
        });
        sender_set
            .connect(addr, Mixer::new(Duration::ZERO, tx_s))
            .await
            .unwrap();
        receiver_set
            .adopt(accept.await.unwrap(), Mixer::new(Duration::ZERO, tx_r))
            .await
            .unwrap();

        let handle = CoverTraffic {
            base: Duration::from_millis(10),
            jitter: Duration::from_millis(10),
        }
        .spawn(sender_set);

        let (_, frame) = tokio::time::timeout(Duration::from_secs(2), rx_r.recv())
            .await
            .expect("cover traffic within bound")
            .unwrap();
        assert!(matches!(frame, StreamFrame::DummyTraffic { .. }));

        handle.abort();
    }
}
