//! The routing-layer interface this crate consumes, plus the sender tag
//! every outbound send carries.

use bytes::Bytes;
use vault_types::{Authority, DataNameVariant, MatrixChange};

use crate::error::DispatchError;

/// Tags an outbound send with the group responsible for it and this node's
/// own identity within that group, so the receiver can validate the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSender {
    pub group: vault_types::GroupId,
    pub self_id: vault_types::NodeId,
}

impl GroupSender {
    pub fn new(group: vault_types::GroupId, self_id: vault_types::NodeId) -> Self {
        Self { group, self_id }
    }

    pub fn as_authority(&self) -> Authority {
        Authority::Group(self.group)
    }
}

/// The routing layer's consumed interface: fire-and-forget sends plus the
/// routing layer's own opportunistic cache hooks (separate from the
/// persona-level [`vault-cache`](../vault_cache) handler).
pub trait Router: Send + Sync {
    /// Sends a pre-serialised envelope. Fire-and-forget: delivery is best
    /// effort, retried by the caller's own `SyncLog`/`DeadlineTimer`
    /// machinery, never by the router itself.
    fn send(&self, receiver: Authority, payload: Bytes) -> Result<(), DispatchError>;

    /// Routing-layer cache probe, independent of [`vault-cache`](../vault_cache).
    fn get_cache_data(&self, _name: &DataNameVariant) -> Option<Bytes> {
        None
    }

    /// Routing-layer cache population hook.
    fn put_cache_data(&self, _name: DataNameVariant, _bytes: Bytes) {}

    /// Current network health in `[-1, 100]`, as last reported by
    /// `network_status`.
    fn network_health(&self) -> i32;

    /// Most recent close-group membership diff, if any has been observed
    /// since startup.
    fn last_matrix_change(&self) -> Option<MatrixChange> {
        None
    }
}
