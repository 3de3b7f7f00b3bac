//! The Pmid Manager: accounts a single holder's usage and relays its
//! store/delete outcomes on to the Data Manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use vault_dispatch::Dispatcher;
use vault_storage::KeyedDb;
use vault_sync::{Accumulator, AddResult, SyncLog};
use vault_types::{Authority, Envelope, Key, MessageId, NodeId, PmidAccount, PmidAccountAction};

use crate::data_manager::{group_for_key, DataManagerMessage};
use crate::service::PersonaService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PmidManagerMessage {
    PutOutcome { key: Key, pmid: NodeId, chunk_size: u64, stored: bool },
    DeleteOutcome { pmid: NodeId, size: u64 },
    SyncAction { pmid: NodeId, action: PmidAccountAction },
}

/// Per-holder account keyed by the holder's own identity, reusing the
/// domain `Key` type the same way the Maid Manager does.
fn account_key(pmid: NodeId) -> Key {
    Key::directory(pmid)
}

pub struct PmidManager {
    self_id: NodeId,
    quorum: usize,
    db: Arc<dyn KeyedDb<PmidAccount>>,
    dispatcher: Arc<Dispatcher>,
    accumulator: Accumulator<PmidManagerMessage>,
    sync_log: SyncLog<PmidAccountAction>,
    membership: Mutex<Vec<NodeId>>,
    next_message_id: AtomicU64,
}

impl PmidManager {
    pub fn new(
        self_id: NodeId,
        group_size: usize,
        db: Arc<dyn KeyedDb<PmidAccount>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let quorum = vault_sync::majority_quorum(group_size);
        Self {
            self_id,
            quorum,
            db,
            dispatcher,
            accumulator: Accumulator::new(4096),
            sync_log: SyncLog::new(quorum, self_id),
            membership: Mutex::new(Vec::new()),
            next_message_id: AtomicU64::new(0),
        }
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::new(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    fn broadcast(&self, pmid: NodeId, action: PmidAccountAction) {
        let peers: Vec<NodeId> =
            self.membership.lock().iter().filter(|p| **p != self.self_id).copied().collect();
        for peer in peers {
            let msg = PmidManagerMessage::SyncAction { pmid, action: action.clone() };
            let _ = self.dispatcher.dispatch(self.next_message_id(), Authority::Single(peer), &msg);
        }
    }

    #[instrument(skip(self))]
    fn commit(&self, pmid: NodeId, action: PmidAccountAction) {
        if let Err(e) = self.db.commit(account_key(pmid), action.clone()) {
            warn!(error = %e, ?pmid, ?action, "pmid account commit failed");
        }
    }

    fn resolve(&self, id: MessageId, origin: NodeId, pmid: NodeId, payload: PmidManagerMessage, action: PmidAccountAction) {
        match self.accumulator.add(id, group_for_key(&account_key(pmid)), origin, payload, self.quorum) {
            AddResult::Duplicate | AddResult::Waiting => {}
            AddResult::Satisfied => {
                if let Some(resolved) = self.sync_log.add_unresolved_action(
                    account_key(pmid),
                    action.clone(),
                    self.self_id,
                    self.self_id,
                ) {
                    self.commit(pmid, resolved.action);
                }
                self.broadcast(pmid, action);
            }
        }
    }
}

impl PersonaService for PmidManager {
    type Message = PmidManagerMessage;

    fn handle_message(&mut self, envelope: Envelope<Self::Message>) {
        let Envelope { id, origin, payload, .. } = envelope;
        match payload {
            PmidManagerMessage::PutOutcome { key, pmid, chunk_size, stored } => {
                if stored {
                    self.resolve(
                        id,
                        origin,
                        pmid,
                        PmidManagerMessage::PutOutcome { key, pmid, chunk_size, stored },
                        PmidAccountAction::RecordStore { size: chunk_size },
                    );
                    let msg = DataManagerMessage::PutResponse { key, pmid, chunk_size };
                    let _ = self.dispatcher.dispatch(
                        self.next_message_id(),
                        Authority::Group(group_for_key(&key)),
                        &msg,
                    );
                } else {
                    let msg = DataManagerMessage::PutFailure { key, pmid };
                    let _ = self.dispatcher.dispatch(
                        self.next_message_id(),
                        Authority::Group(group_for_key(&key)),
                        &msg,
                    );
                }
            }
            PmidManagerMessage::DeleteOutcome { pmid, size } => {
                self.resolve(
                    id,
                    origin,
                    pmid,
                    PmidManagerMessage::DeleteOutcome { pmid, size },
                    PmidAccountAction::RecordLoss { size },
                );
            }
            PmidManagerMessage::SyncAction { pmid, action } => {
                if let Some(resolved) =
                    self.sync_log.add_unresolved_action(account_key(pmid), action, origin, self.self_id)
                {
                    self.commit(pmid, resolved.action);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_dispatch::{GroupSender, LocalRouter};
    use vault_storage::MemoryKeyedDb;
    use vault_types::Identity;

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    fn key(n: u8) -> Key {
        Key::immutable_chunk(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    fn build() -> (PmidManager, Arc<LocalRouter>) {
        let router = Arc::new(LocalRouter::new(100));
        let dispatcher = Arc::new(Dispatcher::new(router.clone(), GroupSender::new(node(0), node(0))));
        let db: Arc<dyn KeyedDb<PmidAccount>> = Arc::new(MemoryKeyedDb::new());
        (PmidManager::new(node(0), 1, db, dispatcher), router)
    }

    #[test]
    fn successful_store_records_usage_and_forwards_to_data_manager() {
        let (mut pm, router) = build();
        let k = key(1);
        let pmid = node(9);
        pm.handle_message(Envelope::new(
            MessageId::new(1),
            Authority::Group(group_for_key(&k)),
            node(1),
            Authority::Group(group_for_key(&k)),
            PmidManagerMessage::PutOutcome { key: k, pmid, chunk_size: 100, stored: true },
        ));
        assert_eq!(pm.db.get(&account_key(pmid)).unwrap().stored_total_size, 100);
        let sent = router.sent();
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn failed_store_forwards_failure_without_recording_usage() {
        let (mut pm, router) = build();
        let k = key(2);
        let pmid = node(9);
        pm.handle_message(Envelope::new(
            MessageId::new(1),
            Authority::Group(group_for_key(&k)),
            node(1),
            Authority::Group(group_for_key(&k)),
            PmidManagerMessage::PutOutcome { key: k, pmid, chunk_size: 100, stored: false },
        ));
        assert!(pm.db.get(&account_key(pmid)).is_err());
        assert_eq!(router.sent().len(), 1);
    }
}
