//! # vault-persona: the replicated vault personas
//!
//! Every persona implements [`PersonaService`] and runs as a single
//! [`PersonaActor`] — one inbox, drained by one task, so all of a persona's
//! own bookkeeping can be mutated without locking. The only state shared
//! across personas (`KeyedDb`, `CacheHandler`, `Dispatcher`) is `Arc`-wrapped
//! and internally synchronised.

mod data_manager;
mod error;
mod maid_manager;
mod pmid_manager;
mod pmid_node;
mod service;
mod version_handler;

pub use data_manager::{group_for_key, DataManager, DataManagerMessage, SyncFamily};
pub use error::PersonaError;
pub use maid_manager::{MaidManager, MaidManagerMessage};
pub use pmid_manager::{PmidManager, PmidManagerMessage};
pub use pmid_node::{ChunkStore, ChunkStoreError, FsChunkStore, MemoryChunkStore, PmidNode, PmidNodeMessage};
pub use service::{PersonaActor, PersonaService};
pub use version_handler::{VersionHandler, VersionHandlerMessage};
