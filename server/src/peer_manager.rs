//! Peer connection management for the authority.
//!
//! Tracks which address belongs to which peer id, watches for silent peers,
//! and enforces the connection cap. Ownership and object state live
//! elsewhere; this module only knows about connections.

use log::info;
use shared::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer as the authority sees it.
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Marks the peer as recently active.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if no packets have arrived within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Roster of connected peers, indexed by id with address lookup.
pub struct PeerManager {
    peers: HashMap<PeerId, Peer>,
    next_peer_id: PeerId,
    max_peers: usize,
    timeout: Duration,
}

impl PeerManager {
    pub fn new(max_peers: usize, timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
        }
    }

    /// Attempts to admit a new peer. Returns None when at capacity.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        info!("Peer {} connected from {}", peer_id, addr);
        self.peers.insert(peer_id, Peer::new(peer_id, addr));
        Some(peer_id)
    }

    pub fn remove_peer(&mut self, peer_id: PeerId) -> Option<Peer> {
        let removed = self.peers.remove(&peer_id);
        if removed.is_some() {
            info!("Peer {} removed", peer_id);
        }
        removed
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.peers
            .values()
            .find(|peer| peer.addr == addr)
            .map(|peer| peer.id)
    }

    pub fn addr_of(&self, peer_id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer_id).map(|peer| peer.addr)
    }

    pub fn touch(&mut self, peer_id: PeerId) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.touch();
        }
    }

    /// Returns the ids of peers that went silent past the timeout.
    pub fn check_timeouts(&mut self) -> Vec<PeerId> {
        let timeout = self.timeout;
        self.peers
            .values()
            .filter(|peer| peer.is_timed_out(timeout))
            .map(|peer| peer.id)
            .collect()
    }

    pub fn peer_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .map(|peer| (peer.id, peer.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
