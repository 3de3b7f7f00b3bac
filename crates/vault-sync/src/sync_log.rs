//! Per-key collection of unresolved actions awaiting group quorum. One
//! `SyncLog<A>` instance exists per action family per persona (`sync_puts`,
//! `sync_add_pmids`, ...).

use std::collections::BTreeSet;
use std::time::Instant;

use parking_lot::Mutex;
use vault_types::{Key, NodeId};

/// A pending action accumulating endorsements from its group.
#[derive(Debug, Clone)]
pub struct UnresolvedAction<A> {
    pub key: Key,
    pub action: A,
    pub originator: NodeId,
    pub observed_by: BTreeSet<NodeId>,
}

/// An action that has crossed quorum and is ready for `KeyedDb::commit`.
#[derive(Debug, Clone)]
pub struct ResolvedAction<A> {
    pub key: Key,
    pub action: A,
}

struct LogEntry<A> {
    key: Key,
    action: A,
    originator: NodeId,
    first_seen: Instant,
    observed_by: BTreeSet<NodeId>,
}

/// Computes the default quorum: `ceil(group_size / 2) + 1`, the standard
/// strict-majority formula — see `DESIGN.md` for why this project uses it
/// over a plain `group_size / 2`.
pub fn majority_quorum(group_size: usize) -> usize {
    group_size / 2 + 1
}

/// Per-key, per-family log of actions awaiting quorum.
pub struct SyncLog<A: Clone + PartialEq> {
    quorum: usize,
    self_id: NodeId,
    entries: Mutex<Vec<LogEntry<A>>>,
    sync_attempts: Mutex<u64>,
}

impl<A: Clone + PartialEq> SyncLog<A> {
    pub fn new(quorum: usize, self_id: NodeId) -> Self {
        Self { quorum, self_id, entries: Mutex::new(Vec::new()), sync_attempts: Mutex::new(0) }
    }

    /// Merges `observer`'s endorsement of `(key, action)` — submitted by
    /// `originator` — into any matching entry, creating one if needed.
    /// Returns the resolved action once `observed_by` reaches quorum *and*
    /// this node itself has observed it — the liveness requirement that
    /// keeps a node from acting on consensus it hasn't itself joined.
    pub fn add_unresolved_action(
        &self,
        key: Key,
        action: A,
        originator: NodeId,
        observer: NodeId,
    ) -> Option<ResolvedAction<A>> {
        let mut entries = self.entries.lock();

        let existing = entries.iter_mut().find(|e| e.key == key && e.action == action);
        let entry = match existing {
            Some(e) => e,
            None => {
                entries.push(LogEntry {
                    key,
                    action: action.clone(),
                    originator,
                    first_seen: Instant::now(),
                    observed_by: BTreeSet::new(),
                });
                entries.last_mut().expect("just pushed")
            }
        };

        // Tie-break: keep the lexicographically-smallest originator and the
        // earliest first-seen timestamp, so two peers merging the same
        // logical action converge on identical entry metadata.
        if originator < entry.originator {
            entry.originator = originator;
        }
        entry.observed_by.insert(observer);

        let resolved = entry.observed_by.len() >= self.quorum && entry.observed_by.contains(&self.self_id);

        if resolved {
            let idx = entries.iter().position(|e| e.key == key && e.action == action).expect("entry exists");
            let entry = entries.remove(idx);
            Some(ResolvedAction { key: entry.key, action: entry.action })
        } else {
            None
        }
    }

    /// Enumerates entries still awaiting quorum, for retransmission.
    pub fn get_unresolved_actions(&self) -> Vec<UnresolvedAction<A>> {
        self.entries
            .lock()
            .iter()
            .map(|e| UnresolvedAction {
                key: e.key,
                action: e.action.clone(),
                originator: e.originator,
                observed_by: e.observed_by.clone(),
            })
            .collect()
    }

    /// Bumps the per-log retransmission-attempt counter and returns the new
    /// value, so the dispatcher can back off.
    pub fn increment_sync_attempts(&self) -> u64 {
        let mut n = self.sync_attempts.lock();
        *n += 1;
        *n
    }

    pub fn pending_len(&self) -> usize {
        self.entries.lock().len()
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
    fn resolves_only_once_self_has_observed() {
        let log: SyncLog<&'static str> = SyncLog::new(2, node(1));
        // Two peers endorse, but not node(1) itself: must not resolve.
        assert!(log.add_unresolved_action(key(1), "put", node(9), node(2)).is_none());
        assert!(log.add_unresolved_action(key(1), "put", node(9), node(3)).is_none());
        assert_eq!(log.pending_len(), 1);
        // Now self observes too: resolves.
        let resolved = log.add_unresolved_action(key(1), "put", node(9), node(1));
        assert!(resolved.is_some());
        assert_eq!(log.pending_len(), 0);
    }

    #[test]
    fn distinct_actions_on_same_key_resolve_independently() {
        let log: SyncLog<&'static str> = SyncLog::new(1, node(1));
        log.add_unresolved_action(key(1), "put", node(9), node(1));
        let resolved = log.add_unresolved_action(key(1), "delete", node(9), node(1));
        assert!(resolved.is_some());
    }

    #[test]
    fn quorum_formula_is_strict_majority() {
        assert_eq!(majority_quorum(1), 1);
        assert_eq!(majority_quorum(4), 3);
        assert_eq!(majority_quorum(5), 3);
    }
}
