//! Peer table: at most one live connection per remote peer

use casm_net::{Connection, PeerId};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Live connections keyed by remote peer id
#[derive(Default)]
pub struct PeerTable {
    conns: RwLock<HashMap<PeerId, Arc<Connection>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `conn` unless its peer already has an entry.
    /// On false the caller still owns `conn` and should close it.
    pub fn add(&self, conn: Arc<Connection>) -> bool {
        match self.conns.write().entry(conn.remote_addr().id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
        }
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<Connection>> {
        self.conns.read().get(&id).cloned()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.conns.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }

    /// Connected peer ids, sorted
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.conns.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Remove the entry for `id`; the caller closes what is returned
    pub fn del(&self, id: PeerId) -> Option<Arc<Connection>> {
        self.conns.write().remove(&id)
    }

    /// Remove `conn` only if it is the entry for its peer
    pub fn remove_conn(&self, conn: &Arc<Connection>) -> bool {
        let mut conns = self.conns.write();
        let id = conn.remote_addr().id();

        match conns.get(&id) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                conns.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Drop every entry without closing the connections
    pub fn reset(&self) {
        self.conns.write().clear();
    }
}
