//! Close-group membership changes delivered by the routing layer.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// A diff over the close-group membership for this vault, as reported by the
/// routing layer on churn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixChange {
    /// Members of the close group before this change.
    pub old_close_group: Vec<NodeId>,
    /// Members of the close group after this change.
    pub new_close_group: Vec<NodeId>,
}

impl MatrixChange {
    pub fn new(old_close_group: Vec<NodeId>, new_close_group: Vec<NodeId>) -> Self {
        Self { old_close_group, new_close_group }
    }

    /// Peers present in the new group but absent from the old one.
    pub fn joined(&self) -> Vec<NodeId> {
        self.new_close_group
            .iter()
            .filter(|n| !self.old_close_group.contains(n))
            .copied()
            .collect()
    }

    /// Peers present in the old group but absent from the new one.
    pub fn left(&self) -> Vec<NodeId> {
        self.old_close_group
            .iter()
            .filter(|n| !self.new_close_group.contains(n))
            .copied()
            .collect()
    }

    /// True if this vault is no longer a member of its own former group —
    /// the case that drives an account hand-off in `KeyedDb::GetTransferInfo`.
    pub fn lost_membership(&self, self_id: NodeId) -> bool {
        self.old_close_group.contains(&self_id) && !self.new_close_group.contains(&self_id)
    }
}
