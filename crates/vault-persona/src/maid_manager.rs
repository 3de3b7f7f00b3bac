//! The Maid Manager: authorises a client's puts and deletes against its
//! account allowance, then forwards to the Data Manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use vault_dispatch::Dispatcher;
use vault_storage::{DbError, KeyedDb};
use vault_sync::{Accumulator, AddResult, SyncLog};
use vault_types::{Authority, Envelope, Key, MaidAccount, MaidAccountAction, MessageId, NodeId, PmidRegistration, ValueError};

use crate::data_manager::group_for_key;
use crate::service::PersonaService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MaidManagerMessage {
    CreateAccount { maid: Key, space_offered: u64 },
    PutRequest { maid: Key, key: Key, chunk_size: u64 },
    DeleteRequest { maid: Key, key: Key, size: u64 },
    RegisterPmid { maid: Key, registration: PmidRegistration },
    SyncAction { maid: Key, action: MaidAccountAction },
}

pub struct MaidManager {
    self_id: NodeId,
    quorum: usize,
    db: Arc<dyn KeyedDb<MaidAccount>>,
    dispatcher: Arc<Dispatcher>,
    accumulator: Accumulator<MaidManagerMessage>,
    sync_log: SyncLog<MaidAccountAction>,
    membership: Mutex<Vec<NodeId>>,
    next_message_id: AtomicU64,
}

impl MaidManager {
    pub fn new(
        self_id: NodeId,
        group_size: usize,
        db: Arc<dyn KeyedDb<MaidAccount>>,
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

    fn broadcast(&self, maid: Key, action: MaidAccountAction) {
        let peers: Vec<NodeId> =
            self.membership.lock().iter().filter(|p| **p != self.self_id).copied().collect();
        for peer in peers {
            let msg = MaidManagerMessage::SyncAction { maid, action: action.clone() };
            let _ = self.dispatcher.dispatch(self.next_message_id(), Authority::Single(peer), &msg);
        }
    }

    #[instrument(skip(self))]
    fn commit(&self, maid: Key, action: MaidAccountAction) {
        match self.db.commit(maid, action.clone()) {
            Ok(_) => {}
            Err(DbError::Value(ValueError::AccountAlreadyExists)) => {
                debug!(?maid, "muted duplicate account-create");
            }
            Err(e) => warn!(error = %e, ?maid, ?action, "maid account commit failed"),
        }
    }

    fn resolve(&self, id: MessageId, origin: NodeId, maid: Key, payload: MaidManagerMessage, action: MaidAccountAction) {
        match self.accumulator.add(id, group_for_key(&maid), origin, payload, self.quorum) {
            AddResult::Duplicate | AddResult::Waiting => {}
            AddResult::Satisfied => {
                if let Some(resolved) =
                    self.sync_log.add_unresolved_action(maid, action.clone(), self.self_id, self.self_id)
                {
                    self.commit(resolved.key, resolved.action);
                }
                self.broadcast(maid, action);
            }
        }
    }
}

impl PersonaService for MaidManager {
    type Message = MaidManagerMessage;

    fn handle_message(&mut self, envelope: Envelope<Self::Message>) {
        let Envelope { id, origin, payload, .. } = envelope;
        match payload {
            MaidManagerMessage::CreateAccount { maid, space_offered } => {
                self.resolve(
                    id,
                    origin,
                    maid,
                    MaidManagerMessage::CreateAccount { maid, space_offered },
                    MaidAccountAction::CreateAccount { space_offered },
                );
            }
            MaidManagerMessage::PutRequest { maid, key, chunk_size } => {
                let allowed = self
                    .db
                    .get(&maid)
                    .map(|account| account.space_available() >= chunk_size)
                    .unwrap_or(false);
                if !allowed {
                    debug!(?maid, chunk_size, "put rejected: insufficient allowance");
                    return;
                }
                self.resolve(
                    id,
                    origin,
                    maid,
                    MaidManagerMessage::PutRequest { maid, key, chunk_size },
                    MaidAccountAction::PutData { size: chunk_size },
                );
                let _ = self.dispatcher.dispatch(
                    self.next_message_id(),
                    Authority::Group(group_for_key(&key)),
                    &crate::data_manager::DataManagerMessage::PutRequest { key, chunk_size },
                );
            }
            MaidManagerMessage::DeleteRequest { maid, key, size } => {
                self.resolve(
                    id,
                    origin,
                    maid,
                    MaidManagerMessage::DeleteRequest { maid, key, size },
                    MaidAccountAction::DeleteData { size },
                );
                let _ = self.dispatcher.dispatch(
                    self.next_message_id(),
                    Authority::Group(group_for_key(&key)),
                    &crate::data_manager::DataManagerMessage::DeleteRequest { key },
                );
            }
            MaidManagerMessage::RegisterPmid { maid, registration } => {
                self.resolve(
                    id,
                    origin,
                    maid,
                    MaidManagerMessage::RegisterPmid { maid, registration: registration.clone() },
                    MaidAccountAction::RegisterPmid(registration),
                );
            }
            MaidManagerMessage::SyncAction { maid, action } => {
                if let Some(resolved) =
                    self.sync_log.add_unresolved_action(maid, action, origin, self.self_id)
                {
                    self.commit(resolved.key, resolved.action);
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

    fn maid(n: u8) -> Key {
        Key::directory(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    fn build() -> (MaidManager, Arc<LocalRouter>) {
        let router = Arc::new(LocalRouter::new(100));
        let dispatcher = Arc::new(Dispatcher::new(router.clone(), GroupSender::new(node(0), node(0))));
        let db: Arc<dyn KeyedDb<MaidAccount>> = Arc::new(MemoryKeyedDb::new());
        (MaidManager::new(node(0), 1, db, dispatcher), router)
    }

    #[test]
    fn put_without_account_is_rejected_silently() {
        let (mut mm, router) = build();
        let m = maid(1);
        mm.handle_message(Envelope::new(
            MessageId::new(1),
            Authority::Group(group_for_key(&m)),
            node(1),
            Authority::Group(group_for_key(&m)),
            MaidManagerMessage::PutRequest { maid: m, key: Key::immutable_chunk(node(9)), chunk_size: 10 },
        ));
        assert!(router.sent().is_empty());
    }

    #[test]
    fn put_within_allowance_forwards_to_data_manager() {
        let (mut mm, router) = build();
        let m = maid(2);
        mm.handle_message(Envelope::new(
            MessageId::new(1),
            Authority::Group(group_for_key(&m)),
            node(1),
            Authority::Group(group_for_key(&m)),
            MaidManagerMessage::CreateAccount { maid: m, space_offered: 1000 },
        ));
        mm.handle_message(Envelope::new(
            MessageId::new(2),
            Authority::Group(group_for_key(&m)),
            node(1),
            Authority::Group(group_for_key(&m)),
            MaidManagerMessage::PutRequest { maid: m, key: Key::immutable_chunk(node(9)), chunk_size: 10 },
        ));
        assert_eq!(router.sent().len(), 1);
    }
}
