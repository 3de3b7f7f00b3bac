//! Deduplicates and counts incoming requests until an arrival predicate is
//! satisfied.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use vault_types::{GroupId, MessageId, NodeId};

/// Outcome of [`Accumulator::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// This exact `(message-id, sender-group)` has already been satisfied,
    /// or this sender has already been counted, or the payload diverged
    /// from the first copy seen.
    Duplicate,
    /// Counted, but the arrival predicate is not yet satisfied.
    Waiting,
    /// The arrival predicate is satisfied for the first time. Fires at most
    /// once per `(message-id, sender-group)`.
    Satisfied,
}

struct Entry<T> {
    senders: Vec<NodeId>,
    first_payload: T,
    satisfied: bool,
    cached_reply: Option<T>,
}

/// Collapses the N incoming copies a close-group send produces into a single
/// logical arrival, keyed by `(message-id, group-id-of-sender)`.
pub struct Accumulator<T> {
    entries: Mutex<LruCache<(MessageId, GroupId), Entry<T>>>,
}

impl<T: Clone + PartialEq> Accumulator<T> {
    /// `capacity` bounds the number of distinct `(message-id, group)` pairs
    /// tracked at once; oldest entries are evicted first.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity > 0");
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Adds one copy of `payload` from `sender` within `group`, for
    /// `message_id`. `required` is the arrival predicate: the number of
    /// distinct senders from `group` needed to satisfy the request.
    pub fn add(
        &self,
        message_id: MessageId,
        group: GroupId,
        sender: NodeId,
        payload: T,
        required: usize,
    ) -> AddResult {
        let mut entries = self.entries.lock();
        let key = (message_id, group);

        if let Some(entry) = entries.get_mut(&key) {
            if entry.satisfied || entry.senders.contains(&sender) {
                return AddResult::Duplicate;
            }
            if entry.first_payload != payload {
                // Divergence: single-honest-majority assumed, so we don't
                // try to arbitrate — treat as a duplicate rather than a
                // competing request.
                return AddResult::Duplicate;
            }
            entry.senders.push(sender);
            if entry.senders.len() >= required {
                entry.satisfied = true;
                AddResult::Satisfied
            } else {
                AddResult::Waiting
            }
        } else {
            let satisfied_now = required <= 1;
            entries.put(
                key,
                Entry {
                    senders: vec![sender],
                    first_payload: payload,
                    satisfied: satisfied_now,
                    cached_reply: None,
                },
            );
            if satisfied_now {
                AddResult::Satisfied
            } else {
                AddResult::Waiting
            }
        }
    }

    /// Stores the reply generated for a satisfied request so later
    /// duplicates can short-circuit without recomputation.
    pub fn set_cached_reply(&self, message_id: MessageId, group: GroupId, reply: T) {
        if let Some(entry) = self.entries.lock().get_mut(&(message_id, group)) {
            entry.cached_reply = Some(reply);
        }
    }

    pub fn cached_reply(&self, message_id: MessageId, group: GroupId) -> Option<T> {
        self.entries.lock().get(&(message_id, group)).and_then(|e| e.cached_reply.clone())
    }
}
