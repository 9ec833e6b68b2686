//! # Connection Management Module
//!
//! Tracks which centrals are connected and routes link events from the
//! Bluetooth stack to the characteristic server.
//!
//! ## Key Components
//! - `ConnectionSet`: shared set of connected peers; readers take snapshots
//! - `ConnectionManager`: event loop that applies `TransportEvent`s
//!
//! ## Ownership
//! Events may arrive at any time relative to the acquisition cycle. The
//! manager's thread is the only writer of the set; the publisher only ever
//! reads a point-in-time snapshot and re-checks membership before sending.

use crate::server::PlxServer;
use crate::transport::{PeerId, Transport, TransportEvent};
use crossbeam_channel::Receiver;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Default)]
pub struct ConnectionSet {
    peers: Arc<RwLock<BTreeSet<PeerId>>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeSet<PeerId>> {
        self.peers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeSet<PeerId>> {
        self.peers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn insert(&self, peer: PeerId) -> bool {
        self.write().insert(peer)
    }

    pub(crate) fn remove(&self, peer: PeerId) -> bool {
        self.write().remove(&peer)
    }

    /// Peers connected at this instant, in ascending order
    pub fn snapshot(&self) -> Vec<PeerId> {
        self.read().iter().copied().collect()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.read().contains(&peer)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Applies link events to the server.
///
/// Runs in a dedicated thread so event handling never waits on the
/// acquisition cycle, and an in-flight indication can be resolved while the
/// publisher is blocked on it.
pub struct ConnectionManager<T: Transport> {
    event_receiver: Receiver<TransportEvent>,
    server: Arc<PlxServer<T>>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(server: Arc<PlxServer<T>>, event_receiver: Receiver<TransportEvent>) -> Self {
        Self {
            event_receiver,
            server,
        }
    }

    /// Runs the event loop until every event sender has been dropped.
    pub fn run(self) {
        while let Ok(event) = self.event_receiver.recv() {
            log::trace!("Connection manager: {:?}", event);
            self.server.handle_event(event);
        }

        log::info!("Connection manager: Event channel closed, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::loopback::LoopbackTransport;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_connection_set_snapshot_is_detached() {
        let set = ConnectionSet::new();
        set.insert(3);
        set.insert(1);

        let snapshot = set.snapshot();
        set.remove(3);

        assert_eq!(snapshot, vec![1, 3]);
        assert!(!set.contains(3));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let set = ConnectionSet::new();
        let reader = set.clone();
        set.insert(9);
        assert!(reader.contains(9));
        assert!(set.remove(9));
        assert!(!set.remove(9));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_manager_applies_events_then_stops() {
        // The transport reports on its own channel so only `event_tx` feeds the manager
        let (stack_tx, _stack_rx) = unbounded();
        let transport = Arc::new(LoopbackTransport::new(stack_tx));
        let server = Arc::new(PlxServer::new(transport, &TransportConfig::default()).unwrap());

        let (event_tx, event_rx) = unbounded();
        let manager = ConnectionManager::new(server.clone(), event_rx);
        event_tx.send(TransportEvent::Connect { peer: 5 }).unwrap();
        event_tx.send(TransportEvent::Connect { peer: 6 }).unwrap();
        event_tx.send(TransportEvent::Disconnect { peer: 5 }).unwrap();
        drop(event_tx);

        std::thread::spawn(move || manager.run()).join().unwrap();
        assert_eq!(server.connections().snapshot(), vec![6]);
    }
}
