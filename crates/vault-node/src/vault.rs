//! Wires the replicated state engine and every persona into one running
//! vault process: builds the `KeyedDb`/`ChunkStore` instances the
//! configuration calls for, spawns one actor task per persona, gates
//! startup on network health, and tears down in the order
//! timers → `SyncLog`s → `KeyedDb` on shutdown.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use vault_cache::CacheHandler;
use vault_config::VaultConfig;
use vault_dispatch::{Dispatcher, GroupSender, Router};
use vault_persona::{
    ChunkStore, DataManager, DataManagerMessage, FsChunkStore, MaidManager, MaidManagerMessage,
    MemoryChunkStore, PersonaActor, PersonaService, PmidManager, PmidManagerMessage, PmidNode,
    PmidNodeMessage, VersionHandler, VersionHandlerMessage,
};
use vault_storage::{DbError, KeyedDb, MemoryKeyedDb, SegmentKeyedDb};
use vault_types::{
    Authority, DataManagerValue, Envelope, Key, MaidAccount, MatrixChange, MessageId, NodeId,
    PmidAccount, Value, VersionHistoryValue,
};

use crate::error::VaultError;
use crate::message::VaultMessage;

type NewOwner = Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync>;
type Compactor = Box<dyn Fn() -> Result<(), DbError> + Send + Sync>;

/// A running vault: the five persona actors plus everything needed to
/// deliver local messages to them and shut them down in order.
pub struct Vault {
    self_id: NodeId,
    router: Arc<dyn Router>,
    maid_manager_tx: Mutex<Option<mpsc::UnboundedSender<Envelope<MaidManagerMessage>>>>,
    data_manager_tx: Mutex<Option<mpsc::UnboundedSender<Envelope<DataManagerMessage>>>>,
    pmid_manager_tx: Mutex<Option<mpsc::UnboundedSender<Envelope<PmidManagerMessage>>>>,
    pmid_node_tx: Mutex<Option<mpsc::UnboundedSender<Envelope<PmidNodeMessage>>>>,
    version_handler_tx: Mutex<Option<mpsc::UnboundedSender<Envelope<VersionHandlerMessage>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    compactors: Vec<Compactor>,
}

impl Vault {
    /// Builds every persona's storage, spawns its actor task, and returns
    /// the assembled vault. Does not itself check network health — callers
    /// should call [`Vault::wait_for_network_health`] before accepting
    /// client-facing work, per the `kMinNetworkHealth` startup gate.
    #[instrument(skip(config, router, new_owner_data, new_owner_version))]
    pub fn new(
        self_id: NodeId,
        config: &VaultConfig,
        router: Arc<dyn Router>,
        new_owner_data: NewOwner,
        new_owner_version: NewOwner,
    ) -> Result<Self, VaultError> {
        let group_size = config.network.group_size;
        let sender = GroupSender::new(self_id, self_id);
        let dispatcher = Arc::new(Dispatcher::new(router.clone(), sender));
        let cache = Arc::new(CacheHandler::new(config.cache.capacity));

        let mut compactors: Vec<Compactor> = Vec::new();

        let maid_db: Arc<dyn KeyedDb<MaidAccount>> = if config.development.in_memory {
            Arc::new(MemoryKeyedDb::new())
        } else {
            let db = Arc::new(SegmentKeyedDb::open(config.node.data_dir.join("maid_manager"))?);
            compactors.push(Self::compactor(db.clone()));
            db
        };
        let data_db: Arc<dyn KeyedDb<DataManagerValue>> = if config.development.in_memory {
            Arc::new(MemoryKeyedDb::new())
        } else {
            let db = Arc::new(SegmentKeyedDb::open(config.node.data_dir.join("data_manager"))?);
            compactors.push(Self::compactor(db.clone()));
            db
        };
        let pmid_account_db: Arc<dyn KeyedDb<PmidAccount>> = if config.development.in_memory {
            Arc::new(MemoryKeyedDb::new())
        } else {
            let db = Arc::new(SegmentKeyedDb::open(config.node.data_dir.join("pmid_manager"))?);
            compactors.push(Self::compactor(db.clone()));
            db
        };
        let version_db: Arc<dyn KeyedDb<VersionHistoryValue>> = if config.development.in_memory {
            Arc::new(MemoryKeyedDb::new())
        } else {
            let db = Arc::new(SegmentKeyedDb::open(config.node.data_dir.join("version_handler"))?);
            compactors.push(Self::compactor(db.clone()));
            db
        };
        let chunk_store: Arc<dyn ChunkStore> = if config.development.in_memory {
            Arc::new(MemoryChunkStore::new())
        } else {
            Arc::new(FsChunkStore::open(&config.storage.chunk_path)?)
        };

        let maid_manager = MaidManager::new(self_id, group_size, maid_db, dispatcher.clone());
        let data_manager =
            DataManager::new(self_id, group_size, data_db, cache, dispatcher.clone(), new_owner_data);
        let pmid_manager = PmidManager::new(self_id, group_size, pmid_account_db, dispatcher.clone());
        let pmid_node = PmidNode::new(self_id, chunk_store, dispatcher.clone());
        let version_handler =
            VersionHandler::new(self_id, group_size, version_db, dispatcher, new_owner_version);

        let (maid_manager_actor, maid_manager_tx) = PersonaActor::new(maid_manager);
        let (data_manager_actor, data_manager_tx) = PersonaActor::new(data_manager);
        let (pmid_manager_actor, pmid_manager_tx) = PersonaActor::new(pmid_manager);
        let (pmid_node_actor, pmid_node_tx) = PersonaActor::new(pmid_node);
        let (version_handler_actor, version_handler_tx) = PersonaActor::new(version_handler);

        let tasks = vec![
            tokio::spawn(maid_manager_actor.run()),
            tokio::spawn(data_manager_actor.run()),
            tokio::spawn(pmid_manager_actor.run()),
            tokio::spawn(pmid_node_actor.run()),
            tokio::spawn(version_handler_actor.run()),
        ];

        info!(group_size, data_dir = %config.node.data_dir.display(), "vault personas started");

        Ok(Self {
            self_id,
            router,
            maid_manager_tx: Mutex::new(Some(maid_manager_tx)),
            data_manager_tx: Mutex::new(Some(data_manager_tx)),
            pmid_manager_tx: Mutex::new(Some(pmid_manager_tx)),
            pmid_node_tx: Mutex::new(Some(pmid_node_tx)),
            version_handler_tx: Mutex::new(Some(version_handler_tx)),
            tasks: Mutex::new(tasks),
            compactors,
        })
    }

    fn compactor<V: Value>(db: Arc<SegmentKeyedDb<V>>) -> Compactor {
        Box::new(move || db.compact())
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Blocks until the router reports network health at or above
    /// `min_network_health`, polling every `poll_interval`. Startup
    /// misconfiguration below the threshold is fatal, per the error
    /// taxonomy's `failed_to_join_network`.
    pub async fn wait_for_network_health(
        &self,
        required: i32,
        poll_interval: std::time::Duration,
        attempts: u32,
    ) -> Result<(), VaultError> {
        for _ in 0..attempts {
            let observed = self.router.network_health();
            if observed >= required {
                return Ok(());
            }
            tokio::time::sleep(poll_interval).await;
        }
        let observed = self.router.network_health();
        Err(VaultError::FailedToJoinNetwork { observed, required })
    }

    /// Delivers a close-group membership change to the personas that track
    /// ownership (Data Manager, Version Handler).
    pub fn on_matrix_change(&self, change: MatrixChange) {
        self.dispatch_local(Envelope::new(
            MessageId::new(0),
            Authority::Single(self.self_id),
            self.self_id,
            Authority::Single(self.self_id),
            VaultMessage::DataManager(DataManagerMessage::ChurnEvent { change: change.clone() }),
        ));
        self.dispatch_local(Envelope::new(
            MessageId::new(0),
            Authority::Single(self.self_id),
            self.self_id,
            Authority::Single(self.self_id),
            VaultMessage::VersionHandler(VersionHandlerMessage::ChurnEvent { change }),
        ));
    }

    /// Routes an already-typed inbound envelope to the persona named by its
    /// payload variant. The routing layer's own job — demultiplexing raw
    /// bytes off the wire into a `VaultMessage` — is out of scope here; this
    /// is the boundary a real binding would call into.
    pub fn dispatch_local(&self, envelope: Envelope<VaultMessage>) {
        macro_rules! forward {
            ($lock:expr, $variant:path) => {{
                let Envelope { id, sender, origin, receiver, payload } = envelope;
                let $variant(inner) = payload else { unreachable!("checked by caller match") };
                let inner_envelope = Envelope::new(id, sender, origin, receiver, inner);
                if let Some(tx) = $lock.lock().as_ref() {
                    if tx.send(inner_envelope).is_err() {
                        warn!("persona actor inbox closed, dropping message");
                    }
                }
            }};
        }

        match &envelope.payload {
            VaultMessage::MaidManager(_) => forward!(self.maid_manager_tx, VaultMessage::MaidManager),
            VaultMessage::DataManager(_) => forward!(self.data_manager_tx, VaultMessage::DataManager),
            VaultMessage::PmidManager(_) => forward!(self.pmid_manager_tx, VaultMessage::PmidManager),
            VaultMessage::PmidNode(_) => forward!(self.pmid_node_tx, VaultMessage::PmidNode),
            VaultMessage::VersionHandler(_) => {
                forward!(self.version_handler_tx, VaultMessage::VersionHandler)
            }
        }
    }

    /// Orderly shutdown: drop every persona's inbox (so each actor's `run`
    /// loop exits once it has drained whatever was already queued — the
    /// `SyncLog`/`DeadlineTimer` teardown §5 calls for, since both live
    /// inside the persona and are dropped with it), join the actor tasks,
    /// then compact every durable `KeyedDb` so the WAL doesn't replay work
    /// already reflected in a snapshot.
    pub async fn shutdown(&self) -> Result<(), VaultError> {
        self.maid_manager_tx.lock().take();
        self.data_manager_tx.lock().take();
        self.pmid_manager_tx.lock().take();
        self.pmid_node_tx.lock().take();
        self.version_handler_tx.lock().take();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        for compact in &self.compactors {
            compact()?;
        }

        info!("vault shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_dispatch::LocalRouter;
    use vault_types::{Authority, Identity, MessageId};

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    fn build() -> Vault {
        let config = VaultConfig::development();
        let router: Arc<dyn Router> = Arc::new(LocalRouter::new(100));
        let no_transfer: NewOwner = Arc::new(|_, _| None);
        Vault::new(node(1), &config, router, no_transfer.clone(), no_transfer).unwrap()
    }

    #[tokio::test]
    async fn wait_for_network_health_succeeds_immediately_when_already_healthy() {
        let vault = build();
        vault.wait_for_network_health(0, std::time::Duration::from_millis(1), 1).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_network_health_fails_when_never_reached() {
        let config = VaultConfig::development();
        let router: Arc<dyn Router> = Arc::new(LocalRouter::new(-1));
        let no_transfer: NewOwner = Arc::new(|_, _| None);
        let vault = Vault::new(node(1), &config, router, no_transfer.clone(), no_transfer).unwrap();
        let err = vault.wait_for_network_health(50, std::time::Duration::from_millis(1), 3).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn dispatch_local_forwards_an_add_pmid_put_into_the_data_manager() {
        let vault = build();
        let k = Key::immutable_chunk(Identity::from([9; vault_types::IDENTITY_BYTES]));
        let envelope = Envelope::new(
            MessageId::new(1),
            Authority::Single(node(2)),
            node(2),
            Authority::Single(node(1)),
            VaultMessage::DataManager(DataManagerMessage::PutResponse {
                key: k,
                pmid: node(9),
                chunk_size: 128,
            }),
        );
        vault.dispatch_local(envelope);
        vault.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_with_respect_to_further_dispatch() {
        let vault = build();
        vault.shutdown().await.unwrap();
        let k = Key::immutable_chunk(Identity::from([1; vault_types::IDENTITY_BYTES]));
        let envelope = Envelope::new(
            MessageId::new(1),
            Authority::Single(node(2)),
            node(2),
            Authority::Single(node(1)),
            VaultMessage::DataManager(DataManagerMessage::GetRequest { key: k }),
        );
        // Post-shutdown sends are dropped, not an error.
        vault.dispatch_local(envelope);
    }
}
