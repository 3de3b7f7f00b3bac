//! Guards against transfer storms: a node that just joined a close group
//! should not re-broadcast the account batch it received back out to the
//! peers it got it from, every time `GetTransferInfo` runs again before the
//! next churn event.

use std::collections::HashSet;

use parking_lot::Mutex;
use vault_types::NodeId;

/// Tracks, per churn generation, which peers this node has already sent (or
/// received) a transfer batch to/from.
///
/// A generation bumps on every `matrix_changed` call; `already_handled`
/// resets implicitly because the set is cleared at that point.
pub struct ChurnEchoGuard {
    generation: Mutex<(u64, HashSet<NodeId>)>,
}

impl Default for ChurnEchoGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ChurnEchoGuard {
    pub fn new() -> Self {
        Self { generation: Mutex::new((0, HashSet::new())) }
    }

    /// Advances to a new churn generation, clearing the handled-peer set.
    pub fn advance(&self) -> u64 {
        let mut g = self.generation.lock();
        g.0 += 1;
        g.1.clear();
        g.0
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.lock().0
    }

    /// Records that `peer` has been handled in the current generation.
    /// Returns `true` if this is the first time — the caller should act on
    /// it — or `false` if `peer` was already handled and the transfer should
    /// be suppressed.
    pub fn mark_handled(&self, peer: NodeId) -> bool {
        self.generation.lock().1.insert(peer)
    }
}
