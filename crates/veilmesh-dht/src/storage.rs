//! DHT Value Storage

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::debug;
use veilmesh_crypto::NodeId;

use crate::DEFAULT_TTL_SECS;

/// Hash an application key into the 160-bit DHT address space
///
/// SHA-1 is the on-wire constant here: it keeps key hashes the same
/// width as node ids so both live on one XOR metric.
pub fn key_hash(key: &str) -> NodeId {
    let digest: [u8; 20] = Sha1::digest(key.as_bytes()).into();
    NodeId::from_bytes(digest)
}

/// A stored value with its freshness window
#[derive(Debug, Clone)]
pub struct StorageEntry {
    /// The value data
    pub value: Value,
    /// When this value was inserted
    pub inserted: Instant,
    /// How long it stays observable
    pub ttl: Duration,
}

impl StorageEntry {
    /// Check if expired
    pub fn is_expired(&self) -> bool {
        self.inserted.elapsed() >= self.ttl
    }
}

/// Local key/value store, keyed by KeyHash
pub struct StorageMap {
    /// Stored entries
    entries: HashMap<NodeId, StorageEntry>,
    /// Maximum entries
    max_entries: usize,
}

impl StorageMap {
    /// Create new storage
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: 10_000,
        }
    }

    /// Create with a custom entry cap
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Insert or overwrite with the default TTL
    pub fn put(&mut self, key: NodeId, value: Value) -> bool {
        self.put_with_ttl(key, value, Duration::from_secs(DEFAULT_TTL_SECS))
    }

    /// Insert or overwrite with an explicit TTL
    pub fn put_with_ttl(&mut self, key: NodeId, value: Value, ttl: Duration) -> bool {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.cleanup();
            if self.entries.len() >= self.max_entries {
                return false;
            }
        }

        self.entries.insert(
            key,
            StorageEntry {
                value,
                inserted: Instant::now(),
                ttl,
            },
        );
        true
    }

    /// Get a non-expired value
    pub fn get(&self, key: &NodeId) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Check if a non-expired entry exists
    pub fn contains(&self, key: &NodeId) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries (expired included until cleanup)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries
    pub fn cleanup(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("cleaned up {} expired entries", removed);
        }
        removed
    }
}

impl Default for StorageMap {
    fn default() -> Self {
        Self::new()
    }
}
