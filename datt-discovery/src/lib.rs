// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content discovery: an index of which peers claim to hold which content hash.
//!
//! The index is fed by `ANNOUNCE_PEERS_FOR_HASH` messages and queried when answering
//! `REQUEST_PEERS_FOR_HASH`. Handlers are pure over the index: they return the message to send
//! (if any) and the node performs the actual sends, so a handler failure can never take the
//! dispatch loop down with it.

use std::collections::{BTreeSet, HashMap};

use datt_core::{Hash, Message, PeerId};

/// Index of peers claiming to hold content, keyed by content hash.
#[derive(Debug, Default)]
pub struct ContentDiscovery {
    peers_for_hash: HashMap<Hash, BTreeSet<PeerId>>,
}

impl ContentDiscovery {
    pub fn new() -> Self {
        Self {
            peers_for_hash: Default::default(),
        }
    }

    /// Answer a discovery request for a hash.
    ///
    /// Builds the `ANNOUNCE_PEERS_FOR_HASH` reply listing every peer known to hold the hash,
    /// including the local peer when it holds the content itself. Returns `None` when there is
    /// nothing to announce.
    pub fn handle_discovery_request(
        &self,
        hash: &Hash,
        local_peer: &PeerId,
        holds_locally: bool,
    ) -> Option<Message> {
        let mut peers = self
            .peers_for_hash
            .get(hash)
            .cloned()
            .unwrap_or_default();
        if holds_locally {
            peers.insert(local_peer.clone());
        }

        if peers.is_empty() {
            return None;
        }

        Some(Message::AnnouncePeersForHash {
            hash: *hash,
            peers: peers.into_iter().collect(),
        })
    }

    /// Record which peers claim to hold a hash.
    pub fn handle_announce_peers_for_hash(&mut self, hash: Hash, peers: Vec<PeerId>) {
        self.peers_for_hash.entry(hash).or_default().extend(peers);
    }

    /// Build the broadcast asking the network who holds a hash.
    pub fn find_peers_for_content(&self, hash: &Hash) -> Message {
        Message::RequestPeersForHash { hash: *hash }
    }

    /// Peers currently known to claim the hash.
    pub fn peers_for(&self, hash: &Hash) -> Vec<PeerId> {
        self.peers_for_hash
            .get(hash)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use datt_core::{Hash, Message, PeerId};

    use super::ContentDiscovery;

    #[test]
    fn records_and_returns_announced_peers() {
        let mut discovery = ContentDiscovery::new();
        let hash = Hash::new(b"test data");

        discovery.handle_announce_peers_for_hash(
            hash,
            vec![PeerId::new("peer-a"), PeerId::new("peer-b")],
        );
        discovery.handle_announce_peers_for_hash(hash, vec![PeerId::new("peer-b")]);

        assert_eq!(
            discovery.peers_for(&hash),
            vec![PeerId::new("peer-a"), PeerId::new("peer-b")]
        );
        assert!(discovery.peers_for(&Hash::new(b"other")).is_empty());
    }

    #[test]
    fn discovery_request_announces_known_peers() {
        let mut discovery = ContentDiscovery::new();
        let hash = Hash::new(b"test data");
        let local = PeerId::new("local");

        assert!(
            discovery
                .handle_discovery_request(&hash, &local, false)
                .is_none()
        );

        discovery.handle_announce_peers_for_hash(hash, vec![PeerId::new("peer-a")]);
        let reply = discovery
            .handle_discovery_request(&hash, &local, false)
            .unwrap();
        assert_eq!(
            reply,
            Message::AnnouncePeersForHash {
                hash,
                peers: vec![PeerId::new("peer-a")],
            }
        );
    }

    #[test]
    fn discovery_request_includes_local_peer_when_it_holds_content() {
        let discovery = ContentDiscovery::new();
        let hash = Hash::new(b"test data");
        let local = PeerId::new("local");

        let reply = discovery
            .handle_discovery_request(&hash, &local, true)
            .unwrap();
        assert_eq!(
            reply,
            Message::AnnouncePeersForHash {
                hash,
                peers: vec![local],
            }
        );
    }

    #[test]
    fn find_peers_builds_the_request_broadcast() {
        let discovery = ContentDiscovery::new();
        let hash = Hash::new(b"test data");
        assert_eq!(
            discovery.find_peers_for_content(&hash),
            Message::RequestPeersForHash { hash }
        );
    }
}
