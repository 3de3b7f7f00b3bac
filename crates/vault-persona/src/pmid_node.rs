//! The Pmid Node: owns the actual chunk bytes for whatever this physical
//! node has been asked to hold. Single-node by nature, so unlike the other
//! personas it never accumulates — every request is serviced directly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use vault_dispatch::Dispatcher;
use vault_types::{Authority, Envelope, Identity, Key, MessageId, NodeId};

use crate::data_manager::{group_for_key, DataManagerMessage};
use crate::pmid_manager::PmidManagerMessage;
use crate::service::PersonaService;

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("chunk not found")]
    NotFound,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a Pmid Node keeps the bytes it has accepted. Two implementations:
/// an in-memory store for tests, and a file-backed one for a real vault.
pub trait ChunkStore: Send + Sync {
    fn put(&self, name: Identity, bytes: Bytes) -> Result<(), ChunkStoreError>;
    fn get(&self, name: &Identity) -> Result<Bytes, ChunkStoreError>;
    fn delete(&self, name: &Identity) -> Result<(), ChunkStoreError>;
    fn has(&self, name: &Identity) -> bool;
}

#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<HashMap<Identity, Bytes>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, name: Identity, bytes: Bytes) -> Result<(), ChunkStoreError> {
        self.chunks.lock().insert(name, bytes);
        Ok(())
    }

    fn get(&self, name: &Identity) -> Result<Bytes, ChunkStoreError> {
        self.chunks.lock().get(name).cloned().ok_or(ChunkStoreError::NotFound)
    }

    fn delete(&self, name: &Identity) -> Result<(), ChunkStoreError> {
        self.chunks.lock().remove(name).ok_or(ChunkStoreError::NotFound)?;
        Ok(())
    }

    fn has(&self, name: &Identity) -> bool {
        self.chunks.lock().contains_key(name)
    }
}

/// A chunk store backed by one file per chunk under `root`, named by the
/// chunk's identity in hex — the same flat-file layout
/// [`SegmentKeyedDb`](vault_storage::SegmentKeyedDb) uses for its WAL
/// directory, applied here to immutable blobs instead of a keyed log.
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ChunkStoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &Identity) -> PathBuf {
        let hex: String = name.as_bytes().iter().map(|b| format!("{b:02x}")).collect();
        self.root.join(hex)
    }
}

impl ChunkStore for FsChunkStore {
    fn put(&self, name: Identity, bytes: Bytes) -> Result<(), ChunkStoreError> {
        fs::write(self.path_for(&name), &bytes)?;
        Ok(())
    }

    fn get(&self, name: &Identity) -> Result<Bytes, ChunkStoreError> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ChunkStoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, name: &Identity) -> Result<(), ChunkStoreError> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ChunkStoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, name: &Identity) -> bool {
        self.path_for(name).exists()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PmidNodeMessage {
    StoreRequest { key: Key, bytes: Bytes },
    GetRequest { key: Key },
    DeleteRequest { key: Key },
}

pub struct PmidNode {
    self_id: NodeId,
    store: Arc<dyn ChunkStore>,
    dispatcher: Arc<Dispatcher>,
    next_message_id: AtomicU64,
}

impl PmidNode {
    pub fn new(self_id: NodeId, store: Arc<dyn ChunkStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { self_id, store, dispatcher, next_message_id: AtomicU64::new(0) }
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::new(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    #[instrument(skip(self, bytes))]
    fn handle_store(&self, key: Key, bytes: Bytes) {
        let chunk_size = bytes.len() as u64;
        let stored = self.store.put(key.name, bytes).is_ok();
        let msg =
            PmidManagerMessage::PutOutcome { key, pmid: self.self_id, chunk_size, stored };
        if let Err(e) = self.dispatcher.dispatch(
            self.next_message_id(),
            Authority::Group(group_for_key(&key)),
            &msg,
        ) {
            warn!(error = %e, ?key, "failed to report store outcome to pmid manager");
        }
    }

    #[instrument(skip(self))]
    fn handle_get(&self, key: Key, requestor: Authority) {
        match self.store.get(&key.name) {
            Ok(bytes) => {
                let msg = DataManagerMessage::GetResponseFromPmidNode { key, bytes };
                let _ = self.dispatcher.dispatch(self.next_message_id(), requestor, &msg);
            }
            Err(ChunkStoreError::NotFound) => {
                warn!(?key, "get request for chunk this node does not hold");
            }
            Err(e) => warn!(error = %e, ?key, "chunk store read failed"),
        }
    }

    #[instrument(skip(self))]
    fn handle_delete(&self, key: Key) {
        match self.store.delete(&key.name) {
            Ok(()) | Err(ChunkStoreError::NotFound) => {}
            Err(e) => warn!(error = %e, ?key, "chunk store delete failed"),
        }
        let msg = PmidManagerMessage::DeleteOutcome { pmid: self.self_id, size: 0 };
        let _ = self.dispatcher.dispatch(
            self.next_message_id(),
            Authority::Group(group_for_key(&key)),
            &msg,
        );
    }
}

impl PersonaService for PmidNode {
    type Message = PmidNodeMessage;

    fn handle_message(&mut self, envelope: Envelope<Self::Message>) {
        let Envelope { sender, payload, .. } = envelope;
        match payload {
            PmidNodeMessage::StoreRequest { key, bytes } => self.handle_store(key, bytes),
            PmidNodeMessage::GetRequest { key } => self.handle_get(key, sender),
            PmidNodeMessage::DeleteRequest { key } => self.handle_delete(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vault_dispatch::{GroupSender, LocalRouter};

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    fn key(n: u8) -> Key {
        Key::immutable_chunk(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    fn build(store: Arc<dyn ChunkStore>) -> (PmidNode, Arc<LocalRouter>) {
        let router = Arc::new(LocalRouter::new(100));
        let dispatcher = Arc::new(Dispatcher::new(router.clone(), GroupSender::new(node(0), node(0))));
        (PmidNode::new(node(0), store, dispatcher), router)
    }

    fn envelope(sender: Authority, payload: PmidNodeMessage) -> Envelope<PmidNodeMessage> {
        Envelope::new(MessageId::new(1), sender, node(1), sender, payload)
    }

    #[test]
    fn store_then_get_round_trips_through_memory_store() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let (mut pn, router) = build(store.clone());
        let k = key(1);
        pn.handle_message(envelope(
            Authority::Group(k.name),
            PmidNodeMessage::StoreRequest { key: k, bytes: Bytes::from_static(b"hello") },
        ));
        assert!(store.has(&k.name));
        pn.handle_message(envelope(
            Authority::Single(node(5)),
            PmidNodeMessage::GetRequest { key: k },
        ));
        let sent = router.sent();
        assert!(sent.iter().any(|(authority, _)| *authority == Authority::Single(node(5))));
    }

    #[test]
    fn fs_chunk_store_persists_to_disk() {
        let dir = tempdir().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();
        let name = node(7);
        store.put(name, Bytes::from_static(b"payload")).unwrap();
        assert_eq!(store.get(&name).unwrap(), Bytes::from_static(b"payload"));
        store.delete(&name).unwrap();
        assert!(matches!(store.get(&name), Err(ChunkStoreError::NotFound)));
    }

    #[test]
    fn delete_of_absent_chunk_is_not_an_error() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let (mut pn, _router) = build(store);
        pn.handle_message(envelope(
            Authority::Group(key(2).name),
            PmidNodeMessage::DeleteRequest { key: key(2) },
        ));
    }
}
