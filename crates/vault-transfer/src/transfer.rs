//! A majority-vote accumulator over `(Key, Value)` claims, shared by the
//! account-transfer protocol (bulk hand-off) and the key/value conflict
//! query protocol.
//!
//! Conflicting transfers run through the same majority-quorum machinery
//! `AccountTransfer` uses for bulk hand-off, so a single settle path applies
//! everywhere — see `DESIGN.md`.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use vault_types::{Key, NodeId};

/// Outcome of feeding one more `(key, value)` claim into a [`MajorityTransfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome<V> {
    /// A majority of the expected group agreed on the same value; ready to
    /// upsert into `KeyedDb` via `handle_transfer`.
    Settled(Key, V),
    /// All expected replicas have reported but no value reached quorum —
    /// requires an `AccountQuery` round-trip to resolve.
    Conflict(Key, Vec<V>),
}

struct Claim<V> {
    value: V,
    senders: BTreeSet<NodeId>,
}

/// Accumulates per-key `(Value, sender)` claims until either a majority
/// agrees (settle) or every expected sender has reported without agreement
/// (conflict).
pub struct MajorityTransfer<V: Clone + PartialEq> {
    quorum: usize,
    group_size: usize,
    pending: Mutex<HashMap<Key, Vec<Claim<V>>>>,
}

impl<V: Clone + PartialEq> MajorityTransfer<V> {
    pub fn new(quorum: usize, group_size: usize) -> Self {
        Self { quorum, group_size, pending: Mutex::new(HashMap::new()) }
    }

    /// Feeds one claim of `(key, value)` reported by `sender`.
    pub fn add_entry(&self, key: Key, value: V, sender: NodeId) -> Option<TransferOutcome<V>> {
        let mut pending = self.pending.lock();
        let claims = pending.entry(key).or_default();

        match claims.iter_mut().find(|c| c.value == value) {
            Some(claim) => {
                claim.senders.insert(sender);
            }
            None => claims.push(Claim { value, senders: BTreeSet::from([sender]) }),
        }

        if let Some(winner) = claims.iter().find(|c| c.senders.len() >= self.quorum) {
            let value = winner.value.clone();
            pending.remove(&key);
            return Some(TransferOutcome::Settled(key, value));
        }

        let distinct_senders: BTreeSet<NodeId> =
            claims.iter().flat_map(|c| c.senders.iter().copied()).collect();
        if distinct_senders.len() >= self.group_size {
            let values = claims.iter().map(|c| c.value.clone()).collect();
            pending.remove(&key);
            return Some(TransferOutcome::Conflict(key, values));
        }

        None
    }

    pub fn pending_keys(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_types::Identity;

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    fn key(n: u8) -> Key {
        Key::immutable_chunk(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    #[test]
    fn settles_on_majority_agreement() {
        let t: MajorityTransfer<u32> = MajorityTransfer::new(2, 3);
        assert_eq!(t.add_entry(key(1), 100, node(1)), None);
        let out = t.add_entry(key(1), 100, node(2));
        assert_eq!(out, Some(TransferOutcome::Settled(key(1), 100)));
    }

    #[test]
    fn flags_conflict_when_group_exhausted_without_majority() {
        let t: MajorityTransfer<u32> = MajorityTransfer::new(2, 2);
        assert_eq!(t.add_entry(key(1), 100, node(1)), None);
        let out = t.add_entry(key(1), 200, node(2));
        match out {
            Some(TransferOutcome::Conflict(k, mut values)) => {
                values.sort_unstable();
                assert_eq!(k, key(1));
                assert_eq!(values, vec![100, 200]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
