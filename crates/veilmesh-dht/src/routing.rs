//! Kademlia Routing Table

use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::trace;
use veilmesh_crypto::{NodeId, PublicKey};

use crate::contact::Contact;
use crate::{K, NUM_BUCKETS};

/// A k-bucket: contacts ordered most-recently-seen first
#[derive(Debug, Default)]
pub struct Bucket {
    contacts: VecDeque<Contact>,
}

impl Bucket {
    /// Create a new empty bucket
    pub fn new() -> Self {
        Self {
            contacts: VecDeque::with_capacity(K),
        }
    }

    /// Get number of contacts
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Iterate contacts, most-recently-seen first
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    /// Record a sighting; evicts the least-recently-seen contact when the
    /// bucket would exceed `k`. Returns the evicted contact, if any.
    fn observe(&mut self, node_id: NodeId, addr: SocketAddr, k: usize) -> Option<Contact> {
        if let Some(pos) = self.contacts.iter().position(|c| c.node_id == node_id) {
            // Keep a previously announced key across re-observations
            let mut existing = self.contacts.remove(pos)?;
            existing.addr = addr;
            existing.touch();
            self.contacts.push_front(existing);
            return None;
        }

        self.contacts.push_front(Contact::new(node_id, addr));

        if self.contacts.len() > k {
            return self.contacts.pop_back();
        }
        None
    }

    fn get(&self, id: &NodeId) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.node_id == *id)
    }

    fn get_mut(&mut self, id: &NodeId) -> Option<&mut Contact> {
        self.contacts.iter_mut().find(|c| c.node_id == *id)
    }
}

/// Kademlia routing table: 160 buckets indexed by the position of the
/// most-significant differing bit (bit 0 = most significant; bucket 159
/// also holds the zero-distance case)
pub struct RoutingTable {
    /// Our node ID
    local_id: NodeId,
    /// Bucket capacity
    k: usize,
    /// One bucket per distance magnitude
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create a new routing table with the default bucket size
    pub fn new(local_id: NodeId) -> Self {
        Self::with_k(local_id, K)
    }

    /// Create a routing table with a custom bucket size
    pub fn with_k(local_id: NodeId, k: usize) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| Bucket::new()).collect();
        Self {
            local_id,
            k,
            buckets,
        }
    }

    /// Our own id
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Bucket index for a node ID
    pub fn bucket_index(&self, id: &NodeId) -> usize {
        (self.local_id.leading_zeros(id) as usize).min(NUM_BUCKETS - 1)
    }

    /// Record a sighting of a peer
    pub fn observe(&mut self, node_id: NodeId, addr: SocketAddr) {
        let index = self.bucket_index(&node_id);
        if let Some(evicted) = self.buckets[index].observe(node_id, addr, self.k) {
            trace!(
                "bucket {} full, evicted {:?} for {:?}",
                index,
                evicted.node_id,
                node_id
            );
        }
    }

    /// Attach an announced encryption key to a known contact
    pub fn record_key(&mut self, node_id: &NodeId, public_key: PublicKey) {
        let index = self.bucket_index(node_id);
        if let Some(contact) = self.buckets[index].get_mut(node_id) {
            contact.public_key = Some(public_key);
        }
    }

    /// Look up a contact by id
    pub fn get(&self, id: &NodeId) -> Option<Contact> {
        let index = self.bucket_index(id);
        self.buckets[index].get(id).cloned()
    }

    /// The `count` contacts closest to `target` by XOR distance,
    /// ties broken by endpoint string
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.iter())
            .cloned()
            .collect();

        all.sort_by(|a, b| {
            target
                .distance(&a.node_id)
                .cmp(&target.distance(&b.node_id))
                .then_with(|| a.addr.to_string().cmp(&b.addr.to_string()))
        });

        all.truncate(count);
        all
    }

    /// All known contacts
    pub fn all_contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter())
            .cloned()
            .collect()
    }

    /// Total contact count
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    /// Bucket at index
    pub fn bucket(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_from_first_byte(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        NodeId::from_bytes(bytes)
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_bucket_index_msb() {
        // Self is all zeroes; a contact with the top bit set differs at
        // bit 0 (most significant)
        let table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        assert_eq!(table.bucket_index(&id_from_first_byte(0x80)), 0);
    }

    #[test]
    fn test_bucket_index_lsb() {
        // A contact differing only in the very last bit lands in bucket 159
        let table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        let mut bytes = [0u8; 20];
        bytes[19] = 0x01;
        assert_eq!(table.bucket_index(&NodeId::from_bytes(bytes)), 159);
    }

    #[test]
    fn test_bucket_index_self() {
        // Zero distance also maps to bucket 159
        let local = NodeId::from_bytes([7u8; 20]);
        let table = RoutingTable::new(local);
        assert_eq!(table.bucket_index(&local), 159);
    }

    #[test]
    fn test_observe_mru_refresh() {
        // Observe A, B, C into the same bucket, then A again: [A, C, B]
        let mut table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        let a = id_from_first_byte(0x80);
        let b = id_from_first_byte(0x81);
        let c = id_from_first_byte(0x82);

        table.observe(a, addr(1));
        table.observe(b, addr(2));
        table.observe(c, addr(3));
        table.observe(a, addr(1));

        let order: Vec<NodeId> = table
            .bucket(0)
            .unwrap()
            .iter()
            .map(|ct| ct.node_id)
            .collect();
        assert_eq!(order, vec![a, c, b]);
    }

    #[test]
    fn test_bucket_eviction() {
        // With k=2, observing A, B, C evicts A: bucket is [C, B]
        let mut table = RoutingTable::with_k(NodeId::from_bytes([0u8; 20]), 2);
        let a = id_from_first_byte(0x80);
        let b = id_from_first_byte(0x81);
        let c = id_from_first_byte(0x82);

        table.observe(a, addr(1));
        table.observe(b, addr(2));
        table.observe(c, addr(3));

        let order: Vec<NodeId> = table
            .bucket(0)
            .unwrap()
            .iter()
            .map(|ct| ct.node_id)
            .collect();
        assert_eq!(order, vec![c, b]);
    }

    #[test]
    fn test_bucket_never_exceeds_k() {
        let mut table = RoutingTable::with_k(NodeId::from_bytes([0u8; 20]), 4);
        for i in 0..10u8 {
            table.observe(id_from_first_byte(0x80 | i), addr(1000 + i as u16));
        }
        assert_eq!(table.bucket(0).unwrap().len(), 4);
    }

    #[test]
    fn test_no_duplicates_by_id() {
        let mut table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        let a = id_from_first_byte(0x80);

        table.observe(a, addr(1));
        table.observe(a, addr(2));

        assert_eq!(table.len(), 1);
        // Endpoint updated by the later observation
        assert_eq!(table.get(&a).unwrap().addr, addr(2));
    }

    #[test]
    fn test_reobserve_keeps_key() {
        let mut table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        let a = id_from_first_byte(0x80);
        let keypair = veilmesh_crypto::KeyPair::generate();

        table.observe(a, addr(1));
        table.record_key(&a, keypair.public);
        table.observe(a, addr(1));

        assert_eq!(table.get(&a).unwrap().public_key, Some(keypair.public));
    }

    #[test]
    fn test_closest_zero_count() {
        let mut table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        table.observe(id_from_first_byte(0x80), addr(1));

        assert!(table.closest(&NodeId::random(), 0).is_empty());
    }

    #[test]
    fn test_closest_more_than_all() {
        let mut table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        for i in 1..=5u8 {
            table.observe(id_from_first_byte(i), addr(i as u16));
        }

        let closest = table.closest(&NodeId::from_bytes([0u8; 20]), 100);
        assert_eq!(closest.len(), 5);

        // Fully sorted by distance to the all-zero target
        for pair in closest.windows(2) {
            let target = NodeId::from_bytes([0u8; 20]);
            assert!(
                target.distance(&pair[0].node_id) <= target.distance(&pair[1].node_id)
            );
        }
    }

    #[test]
    fn test_closest_orders_by_distance() {
        let mut table = RoutingTable::new(NodeId::from_bytes([0u8; 20]));
        let near = id_from_first_byte(0x01);
        let far = id_from_first_byte(0xF0);

        table.observe(far, addr(1));
        table.observe(near, addr(2));

        let closest = table.closest(&NodeId::from_bytes([0u8; 20]), 2);
        assert_eq!(closest[0].node_id, near);
        assert_eq!(closest[1].node_id, far);
    }

    #[test]
    fn test_bucket_invariant_msb_position() {
        // Every contact in bucket i differs from us first at bit i
        let local = NodeId::from_bytes([0u8; 20]);
        let mut table = RoutingTable::new(local);

        for i in 0..8u8 {
            table.observe(id_from_first_byte(0x80 >> i), addr(2000 + i as u16));
        }

        for i in 0..8usize {
            let bucket = table.bucket(i).unwrap();
            assert_eq!(bucket.len(), 1);
            for contact in bucket.iter() {
                assert_eq!(local.leading_zeros(&contact.node_id) as usize, i);
            }
        }
    }
}
