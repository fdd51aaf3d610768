//! # Peer Registry
//!
//! Name to connection mapping shared by all handler threads.
//!
//! Entries keep insertion order, so rosters list peers in the order they
//! joined. Registering an existing name replaces that entry in place.
//! Every mutation bumps a generation counter and returns a point-in-time
//! [`Roster`] taken under the same lock, so broadcasts can be written
//! after the lock is released and still be ordered.

use std::sync::Arc;

use parking_lot::RwLock;

use super::connection::{ConnectionId, PeerConnection};

/// Point-in-time copy of the registry.
#[derive(Clone, Debug)]
pub struct Roster {
    /// Increases with every registry mutation.
    pub generation: u64,
    /// Registered names in registry order.
    pub names: Vec<String>,
    /// Connections in the same order as `names`.
    pub peers: Vec<Arc<PeerConnection>>,
}

#[derive(Debug, Default)]
struct Entries {
    generation: u64,
    peers: Vec<(String, Arc<PeerConnection>)>,
}

impl Entries {
    fn roster(&self) -> Roster {
        Roster {
            generation: self.generation,
            names: self.peers.iter().map(|(name, _)| name.clone()).collect(),
            peers: self.peers.iter().map(|(_, peer)| Arc::clone(peer)).collect(),
        }
    }
}

/// Registered peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    entries: RwLock<Entries>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer` under `name`, replacing any previous holder.
    ///
    /// Returns the displaced connection, if any, and the roster after the
    /// change.
    pub fn register(
        &self,
        name: &str,
        peer: Arc<PeerConnection>,
    ) -> (Option<Arc<PeerConnection>>, Roster) {
        let mut entries = self.entries.write();
        let displaced = match entries.peers.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => Some(std::mem::replace(&mut slot.1, peer)),
            None => {
                entries.peers.push((name.to_string(), peer));
                None
            }
        };
        entries.generation += 1;
        (displaced, entries.roster())
    }

    /// Removes `name` only if it is still held by connection `id`.
    ///
    /// Returns the roster after removal, or `None` if nothing was removed
    /// because a newer connection took the name over.
    pub fn remove_if_owned(&self, name: &str, id: ConnectionId) -> Option<Roster> {
        let mut entries = self.entries.write();
        let index = entries
            .peers
            .iter()
            .position(|(n, peer)| n == name && peer.id() == id)?;
        entries.peers.remove(index);
        entries.generation += 1;
        Some(entries.roster())
    }

    /// Connection registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<PeerConnection>> {
        self.entries
            .read()
            .peers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, peer)| Arc::clone(peer))
    }

    /// Current roster.
    #[must_use]
    pub fn roster(&self) -> Roster {
        self.entries.read().roster()
    }

    /// Registered names in registry order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.read().peers.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().peers.len()
    }

    /// True when nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry and returns the connections.
    pub fn drain(&self) -> Vec<Arc<PeerConnection>> {
        let mut entries = self.entries.write();
        entries.generation += 1;
        entries.peers.drain(..).map(|(_, peer)| peer).collect()
    }
}
