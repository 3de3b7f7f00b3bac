//! The Version Handler: a reduced Data-Manager-shaped persona for mutable
//! structured data (directories, mutable data). Same replication machinery
//! as the Data Manager, specialised to a linear version history instead of
//! a holder set — there are no Pmid holders to track here, just the
//! history of content identities an owner has pointed the key at.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use vault_dispatch::Dispatcher;
use vault_storage::{DbError, KeyedDb};
use vault_sync::{Accumulator, AddResult, SyncLog};
use vault_transfer::{ChurnEchoGuard, KvTransfer, TransferOutcome};
use vault_types::{
    Authority, Envelope, GroupId, Key, MatrixChange, MessageId, NodeId, ValueError,
    VersionHistoryAction, VersionHistoryValue,
};

use crate::data_manager::group_for_key;
use crate::service::PersonaService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VersionHandlerMessage {
    CreateRequest { key: Key, owner: NodeId, initial_version: NodeId },
    PutVersionRequest { key: Key, version: NodeId },
    GetRequest { key: Key },
    GetResponse { key: Key, value: VersionHistoryValue },
    DeleteRequest { key: Key },
    SyncAction { key: Key, action: VersionHistoryAction },
    AccountQuery { key: Key },
    AccountQueryResponse { key: Key, value: Option<VersionHistoryValue> },
    /// Delivered by the owning node when the routing layer reports a
    /// close-group membership change; not sent by peers.
    ChurnEvent { change: MatrixChange },
}

pub struct VersionHandler {
    self_id: NodeId,
    quorum: usize,
    db: Arc<dyn KeyedDb<VersionHistoryValue>>,
    dispatcher: Arc<Dispatcher>,
    new_owner: Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync>,
    membership: Mutex<Vec<NodeId>>,
    accumulator: Accumulator<VersionHandlerMessage>,
    sync_log: SyncLog<VersionHistoryAction>,
    kv_transfer: KvTransfer<VersionHistoryValue>,
    churn_guard: ChurnEchoGuard,
    next_message_id: AtomicU64,
}

impl VersionHandler {
    pub fn new(
        self_id: NodeId,
        group_size: usize,
        db: Arc<dyn KeyedDb<VersionHistoryValue>>,
        dispatcher: Arc<Dispatcher>,
        new_owner: Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync>,
    ) -> Self {
        let quorum = vault_sync::majority_quorum(group_size);
        Self {
            self_id,
            quorum,
            db,
            dispatcher,
            new_owner,
            membership: Mutex::new(Vec::new()),
            accumulator: Accumulator::new(4096),
            sync_log: SyncLog::new(quorum, self_id),
            kv_transfer: KvTransfer::new(quorum, group_size),
            churn_guard: ChurnEchoGuard::new(),
            next_message_id: AtomicU64::new(0),
        }
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::new(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    fn broadcast(&self, key: Key, action: VersionHistoryAction) {
        let peers: Vec<NodeId> =
            self.membership.lock().iter().filter(|p| **p != self.self_id).copied().collect();
        for peer in peers {
            let msg = VersionHandlerMessage::SyncAction { key, action: action.clone() };
            let _ = self.dispatcher.dispatch(self.next_message_id(), Authority::Single(peer), &msg);
        }
    }

    #[instrument(skip(self))]
    fn commit(&self, key: Key, action: VersionHistoryAction) {
        match self.db.commit(key, action.clone()) {
            Ok(_) => {}
            Err(DbError::Value(ValueError::AccountAlreadyExists)) => {
                debug!(?key, "muted duplicate create");
            }
            Err(e) => warn!(error = %e, ?key, ?action, "version history commit failed"),
        }
    }

    fn resolve(&self, id: MessageId, origin: NodeId, key: Key, payload: VersionHandlerMessage, action: VersionHistoryAction) {
        match self.accumulator.add(id, group_for_key(&key), origin, payload, self.quorum) {
            AddResult::Duplicate | AddResult::Waiting => {}
            AddResult::Satisfied => {
                if let Some(resolved) =
                    self.sync_log.add_unresolved_action(key, action.clone(), self.self_id, self.self_id)
                {
                    self.commit(resolved.key, resolved.action);
                }
                self.broadcast(key, action);
            }
        }
    }

    fn handle_get(&self, key: Key, requestor: Authority, message_id: MessageId) {
        match self.db.get(&key) {
            Ok(value) => {
                let msg = VersionHandlerMessage::GetResponse { key, value };
                let _ = self.dispatcher.dispatch(message_id, requestor, &msg);
            }
            Err(DbError::Value(ValueError::NoSuchAccount | ValueError::NoSuchElement)) => {
                debug!(?key, "get on unknown mutable-data key");
            }
            Err(e) => warn!(error = %e, ?key, "version history lookup failed"),
        }
    }

    #[instrument(skip(self, change))]
    pub fn handle_churn_event(&self, change: &MatrixChange) {
        *self.membership.lock() = change.new_close_group.clone();
        self.churn_guard.advance();

        let transfer_info = self.db.get_transfer_info(change, self.new_owner.as_ref());
        for (dest, entries) in transfer_info {
            for (key, value) in entries {
                let msg = VersionHandlerMessage::AccountQueryResponse { key, value: Some(value) };
                if let Err(e) =
                    self.dispatcher.dispatch(self.next_message_id(), Authority::Single(dest), &msg)
                {
                    warn!(error = %e, ?dest, "failed to dispatch version history transfer");
                }
            }
        }
    }

    pub fn record_count(&self) -> usize {
        self.db.len()
    }
}

impl PersonaService for VersionHandler {
    type Message = VersionHandlerMessage;

    fn handle_message(&mut self, envelope: Envelope<Self::Message>) {
        let Envelope { id, sender, origin, payload, .. } = envelope;
        match payload {
            VersionHandlerMessage::CreateRequest { key, owner, initial_version } => {
                self.resolve(
                    id,
                    origin,
                    key,
                    VersionHandlerMessage::CreateRequest { key, owner, initial_version },
                    VersionHistoryAction::Create { owner, initial_version },
                );
            }
            VersionHandlerMessage::PutVersionRequest { key, version } => {
                self.resolve(
                    id,
                    origin,
                    key,
                    VersionHandlerMessage::PutVersionRequest { key, version },
                    VersionHistoryAction::PutVersion { version },
                );
            }
            VersionHandlerMessage::GetRequest { key } => self.handle_get(key, sender, id),
            VersionHandlerMessage::GetResponse { .. } => {
                // A reply the caller is expected to match against its own
                // outstanding request table; this persona has none to keep
                // itself, so replies simply pass through to whoever asked.
            }
            VersionHandlerMessage::DeleteRequest { key } => {
                self.resolve(
                    id,
                    origin,
                    key,
                    VersionHandlerMessage::DeleteRequest { key },
                    VersionHistoryAction::Delete,
                );
            }
            VersionHandlerMessage::SyncAction { key, action } => {
                if let Some(resolved) =
                    self.sync_log.add_unresolved_action(key, action, origin, self.self_id)
                {
                    self.commit(resolved.key, resolved.action);
                }
            }
            VersionHandlerMessage::AccountQuery { key } => {
                let value = self.db.get(&key).ok();
                let msg = VersionHandlerMessage::AccountQueryResponse { key, value };
                let _ = self.dispatcher.dispatch(self.next_message_id(), Authority::Single(origin), &msg);
            }
            VersionHandlerMessage::AccountQueryResponse { key, value } => {
                if !self.churn_guard.mark_handled(origin) {
                    debug!(?origin, "suppressing echoed version transfer until next churn");
                    return;
                }
                let Some(value) = value else { return };
                match self.kv_transfer.add_entry(key, value, origin) {
                    Some(TransferOutcome::Settled(key, value)) => {
                        if let Err(e) = self.db.handle_transfer(vec![(key, value)]) {
                            warn!(error = %e, ?key, "handle_transfer failed for version history");
                        }
                    }
                    Some(TransferOutcome::Conflict(key, _)) => {
                        warn!(?key, "version history conflict persisted after quorum of responses");
                    }
                    None => {}
                }
            }
            VersionHandlerMessage::ChurnEvent { change } => self.handle_churn_event(&change),
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
        Key::mutable_data(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    fn build() -> (VersionHandler, Arc<LocalRouter>) {
        let router = Arc::new(LocalRouter::new(100));
        let dispatcher = Arc::new(Dispatcher::new(router.clone(), GroupSender::new(node(0), node(0))));
        let db: Arc<dyn KeyedDb<VersionHistoryValue>> = Arc::new(MemoryKeyedDb::new());
        let new_owner: Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync> =
            Arc::new(|_, _| None);
        (VersionHandler::new(node(0), 1, db, dispatcher, new_owner), router)
    }

    fn envelope(id: u64, origin: NodeId, group: GroupId, payload: VersionHandlerMessage) -> Envelope<VersionHandlerMessage> {
        Envelope::new(MessageId::new(id), Authority::Group(group), origin, Authority::Group(group), payload)
    }

    #[test]
    fn create_then_put_version_extends_history() {
        let (mut vh, _router) = build();
        let k = key(1);
        vh.handle_message(envelope(
            1,
            node(1),
            group_for_key(&k),
            VersionHandlerMessage::CreateRequest { key: k, owner: node(1), initial_version: node(100) },
        ));
        vh.handle_message(envelope(
            2,
            node(1),
            group_for_key(&k),
            VersionHandlerMessage::PutVersionRequest { key: k, version: node(101) },
        ));
        assert_eq!(vh.db.get(&k).unwrap().versions, vec![node(100), node(101)]);
    }

    #[test]
    fn put_version_without_create_is_muted() {
        let (mut vh, _router) = build();
        let k = key(2);
        vh.handle_message(envelope(
            1,
            node(1),
            group_for_key(&k),
            VersionHandlerMessage::PutVersionRequest { key: k, version: node(5) },
        ));
        assert_eq!(vh.record_count(), 0);
    }
}
