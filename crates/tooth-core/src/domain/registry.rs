//! Bounded, insertion-ordered cache of discovered peers.
//!
//! The registry is shared read-mostly state: the discovery controller is
//! its only writer, everyone else takes [`PeerRegistry::all`] snapshots.
//!
//! # Overflow policy
//!
//! When an insertion pushes the registry past its capacity the whole cache
//! is cleared, including the peer that was just inserted.  That peer is
//! still delivered on the discovery event stream; it simply is not retained.
//! This is a deliberate simplification, not an LRU.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::peer::{Peer, PeerAddress};
use crate::session::Session;

/// Default number of peers retained before the registry clears itself.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 500;

/// What [`PeerRegistry::record_discovery`] did with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new address was appended.
    Inserted,
    /// An existing entry was overwritten in place.
    Updated,
    /// The insertion exceeded capacity and the registry was cleared.
    Overflowed,
}

/// In-memory cache of discovered peers keyed by hardware address.
///
/// A `Vec` keeps insertion order for snapshots; a `HashMap` maps each
/// address to its position so re-discovery is O(1).
#[derive(Debug)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
    index: HashMap<PeerAddress, usize>,
    capacity: usize,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that clears itself once it holds more than
    /// `capacity` peers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            peers: Vec::new(),
            index: HashMap::new(),
            capacity,
        }
    }

    /// Records a discovered peer.
    ///
    /// A known address is overwritten in place, keeping its original
    /// position.  If the new record carries no session, the session attached
    /// to the old entry is carried over so a re-scan does not orphan a live
    /// connection.
    pub fn record_discovery(&mut self, mut peer: Peer) -> RecordOutcome {
        if let Some(&pos) = self.index.get(&peer.address) {
            let existing = &mut self.peers[pos];
            if peer.session.is_none() {
                peer.session = existing.session.take();
            }
            *existing = peer;
            return RecordOutcome::Updated;
        }

        self.index.insert(peer.address, self.peers.len());
        self.peers.push(peer);

        if self.peers.len() > self.capacity {
            warn!(
                capacity = self.capacity,
                "peer registry overflowed, clearing all entries"
            );
            self.clear();
            return RecordOutcome::Overflowed;
        }
        RecordOutcome::Inserted
    }

    /// Returns a snapshot of all peers in insertion order.
    pub fn all(&self) -> Vec<Peer> {
        self.peers.clone()
    }

    /// Returns the peer recorded under `address`.
    pub fn get(&self, address: &PeerAddress) -> Option<&Peer> {
        self.index.get(address).map(|&pos| &self.peers[pos])
    }

    /// Returns the first peer whose display name equals `name`.
    pub fn find_by_name(&self, name: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.display_name == name)
    }

    /// Returns every peer advertising the host marker, in insertion order.
    pub fn hosts(&self) -> Vec<Peer> {
        self.peers.iter().filter(|p| p.is_host()).cloned().collect()
    }

    /// Attaches `session` to the peer at `address`, replacing any previous
    /// handle.  Returns `false` when the address is unknown.
    pub fn attach_session(&mut self, address: &PeerAddress, session: Session) -> bool {
        match self.index.get(address) {
            Some(&pos) => {
                debug!(peer = %address, "session attached to registry entry");
                self.peers[pos].session = Some(session);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
