//! Single-process test doubles for [`Router`]: [`LocalRouter`] records sends
//! for assertion, [`SimRouter`] wires several named nodes together over
//! in-process channels so integration tests can exercise multi-node
//! scenarios without real sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use vault_types::{Authority, DataNameVariant, MatrixChange, NodeId};

use crate::error::DispatchError;
use crate::router::Router;

/// Records every send for test assertion; never actually delivers.
pub struct LocalRouter {
    sent: Mutex<Vec<(Authority, Bytes)>>,
    health: AtomicI32,
}

impl LocalRouter {
    pub fn new(health: i32) -> Self {
        Self { sent: Mutex::new(Vec::new()), health: AtomicI32::new(health) }
    }

    pub fn sent(&self) -> Vec<(Authority, Bytes)> {
        self.sent.lock().clone()
    }

    pub fn set_health(&self, health: i32) {
        self.health.store(health, Ordering::SeqCst);
    }
}

impl Router for LocalRouter {
    fn send(&self, receiver: Authority, payload: Bytes) -> Result<(), DispatchError> {
        self.sent.lock().push((receiver, payload));
        Ok(())
    }

    fn network_health(&self) -> i32 {
        self.health.load(Ordering::SeqCst)
    }
}

/// One node's inbound mailbox within a [`SimRouter`] topology.
pub struct SimNode {
    pub node_id: NodeId,
    pub inbox: Mutex<mpsc::UnboundedReceiver<(Authority, Bytes)>>,
}

/// A small in-process simulated network: each registered node has an
/// `UnboundedSender` reachable by every other node's [`SimRouter`] handle,
/// modelling `single`/`group` sends without any real transport.
pub struct SimRouter {
    self_id: NodeId,
    peers: Mutex<HashMap<NodeId, mpsc::UnboundedSender<(Authority, Bytes)>>>,
    health: AtomicI32,
    last_matrix_change: Mutex<Option<MatrixChange>>,
}

impl SimRouter {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            peers: Mutex::new(HashMap::new()),
            health: AtomicI32::new(100),
            last_matrix_change: Mutex::new(None),
        }
    }

    /// Registers `peer`'s inbound channel so this router can reach it.
    pub fn connect(&self, peer: NodeId, inbox: mpsc::UnboundedSender<(Authority, Bytes)>) {
        self.peers.lock().insert(peer, inbox);
    }

    pub fn set_matrix_change(&self, change: MatrixChange) {
        *self.last_matrix_change.lock() = Some(change);
    }

    /// Delivers to every connected peer whose id matches `receiver`'s scope.
    /// For `Authority::Single`/`Relay` this means exactly one peer (if
    /// connected); for `Authority::Group`, all connected peers are treated
    /// as candidate members — the caller is expected to have only connected
    /// this router to its own close group.
    fn deliver(&self, receiver: Authority, payload: Bytes) -> Result<(), DispatchError> {
        let peers = self.peers.lock();
        match receiver {
            Authority::Single(id) | Authority::Relay(id) => {
                let tx = peers
                    .get(&id)
                    .ok_or_else(|| DispatchError::Unroutable(id.to_string()))?;
                tx.send((receiver, payload)).map_err(|_| DispatchError::ChannelClosed)
            }
            Authority::Group(_) => {
                for tx in peers.values() {
                    let _ = tx.send((receiver, payload.clone()));
                }
                Ok(())
            }
        }
    }
}

impl Router for SimRouter {
    fn send(&self, receiver: Authority, payload: Bytes) -> Result<(), DispatchError> {
        self.deliver(receiver, payload)
    }

    fn network_health(&self) -> i32 {
        self.health.load(Ordering::SeqCst)
    }

    fn last_matrix_change(&self) -> Option<MatrixChange> {
        self.last_matrix_change.lock().clone()
    }
}

impl std::fmt::Debug for SimRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRouter").field("self_id", &self.self_id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_types::Identity;

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    #[test]
    fn single_send_reaches_connected_peer() {
        let router = SimRouter::new(node(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.connect(node(2), tx);

        router.send(Authority::Single(node(2)), Bytes::from_static(b"hi")).unwrap();
        let (authority, payload) = rx.try_recv().unwrap();
        assert_eq!(authority, Authority::Single(node(2)));
        assert_eq!(payload, Bytes::from_static(b"hi"));
    }

    #[test]
    fn send_to_unconnected_peer_is_unroutable() {
        let router = SimRouter::new(node(1));
        let err = router.send(Authority::Single(node(9)), Bytes::from_static(b"hi")).unwrap_err();
        assert!(matches!(err, DispatchError::Unroutable(_)));
    }
}
