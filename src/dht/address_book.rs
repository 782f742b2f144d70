use std::collections::HashMap;

use parking_lot::RwLock;

use super::node::{NodeId, PeerInfo};

/// The set of peers this node knows about, keyed by id.
///
/// The first endpoint seen for an id is kept for good: later announcements
/// of the same id with a different address or port do not replace it.
pub struct AddressBook {
    our_id: NodeId,
    peers: RwLock<HashMap<NodeId, PeerInfo>>,
}

impl AddressBook {
    pub fn new(our_id: NodeId) -> Self {
        Self {
            our_id,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Inserts `peer` unless its id is already known or is our own.
    /// Returns whether the book changed.
    pub(crate) fn insert(&self, peer: PeerInfo) -> bool {
        if peer.id == self.our_id {
            return false;
        }

        let mut peers = self.peers.write();
        if peers.contains_key(&peer.id) {
            return false;
        }
        peers.insert(peer.id, peer);
        true
    }

    pub fn get(&self, id: &NodeId) -> Option<PeerInfo> {
        self.peers.read().get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Snapshot of every known peer, in no particular order.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().values().cloned().collect()
    }

    /// Up to `count` peers ordered by ascending XOR distance to `target`.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<PeerInfo> {
        let mut peers: Vec<([u8; 20], PeerInfo)> = self
            .peers
            .read()
            .values()
            .map(|peer| (peer.id.distance(target), peer.clone()))
            .collect();

        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers.truncate(count);
        peers.into_iter().map(|(_, peer)| peer).collect()
    }
}
