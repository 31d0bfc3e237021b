//! Mixing Queue
//!
//! Inbound frames are held for a random delay drawn uniformly from
//! `[0, mixing_delay_max]` before dispatch. Two frames arriving moments
//! apart can be released in reverse order; decorrelating arrival and
//! departure timing is the point.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::trace;

use crate::peers::PeerId;
use crate::wire::StreamFrame;

/// Randomized delay stage between the peer readers and the dispatcher
#[derive(Clone)]
pub struct Mixer {
    delay_max: Duration,
    out: mpsc::Sender<(PeerId, StreamFrame)>,
}

impl Mixer {
    /// Create a mixer feeding the dispatch channel
    pub fn new(delay_max: Duration, out: mpsc::Sender<(PeerId, StreamFrame)>) -> Self {
        Self { delay_max, out }
    }

    /// Schedule a frame for release after a random delay
    pub fn enqueue(&self, peer: PeerId, frame: StreamFrame) {
        let delay = if self.delay_max.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = self.delay_max.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        };

        trace!("mixing frame from peer {} for {:?}", peer, delay);

        let out = self.out.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A closed dispatcher means the node is shutting down
            let _ = out.send((peer, frame)).await;
        });
    }
}
