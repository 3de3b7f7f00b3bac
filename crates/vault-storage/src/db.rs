//! The `KeyedDb` contract.

use std::collections::HashMap;

use vault_types::{Key, MatrixChange, NodeId, Value};

use crate::error::DbError;

/// A durable, crash-safe ordered map from [`Key`] to `V`.
///
/// Implementations must serialise concurrent `commit` calls on the same key;
/// `get_transfer_info` must never mutate the database.
pub trait KeyedDb<V: Value>: Send + Sync {
    /// Atomically reads, applies `action`, and writes back the result.
    ///
    /// If `key` is absent the action must be of a "create" family
    /// ([`ActionKind::is_create`](vault_types::ActionKind::is_create)) or
    /// this fails with [`DbError::Value`]`(`[`ValueError::NoSuchAccount`](vault_types::ValueError::NoSuchAccount)`)`.
    fn commit(&self, key: Key, action: V::Action) -> Result<V, DbError>;

    /// Looks up the current value for `key`.
    fn get(&self, key: &Key) -> Result<V, DbError>;

    /// Partitions current contents by which peer is now the primary owner,
    /// per `new_owner`. A key maps to `None` when this node keeps it.
    /// Never mutates the database.
    fn get_transfer_info(
        &self,
        change: &MatrixChange,
        new_owner: &dyn Fn(&Key, &MatrixChange) -> Option<NodeId>,
    ) -> HashMap<NodeId, Vec<(Key, V)>>;

    /// Idempotent bulk upsert: incoming values are merged into any existing
    /// value via [`Value::merge`]; absent keys are inserted as-is.
    fn handle_transfer(&self, entries: Vec<(Key, V)>) -> Result<(), DbError>;

    /// Removes `key` entirely. Idempotent: removing an absent key is not an
    /// error, matching the other bulk/transfer operations in this trait.
    fn remove(&self, key: &Key) -> Result<(), DbError>;

    /// Number of keys currently stored. Exposed for diagnostics and tests.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
