//! Overlay events
//!
//! Subsystems reach the application through an [`EventSink`] capability
//! handed in at construction, so no back-reference to the owning node is
//! needed.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::peers::PeerId;

/// Events surfaced by the overlay node
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    /// A payload exited a circuit at this node
    AnonymousMessage(Value),
    /// A peer connection was accepted or established
    PeerConnected(PeerId),
}

/// Capability for emitting overlay events
pub trait EventSink: Send + Sync {
    /// Deliver one event; must not block
    fn emit(&self, event: OverlayEvent);
}

/// Channel-backed sink for applications that want to consume events
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OverlayEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiving half
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OverlayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: OverlayEvent) {
        // A dropped receiver just means nobody is listening
        let _ = self.tx.send(event);
    }
}
