//! # vault-node: wires the replicated state engine into a running process
//!
//! [`Vault`] owns the five persona actors (Maid Manager, Data Manager, Pmid
//! Manager, Pmid Node, Version Handler), each its own `tokio` task draining
//! one inbox, and the durable storage configured via [`vault_config`].
//! Startup gates on network health, shutdown tears down in the order
//! timers → `SyncLog`s → `KeyedDb`.

mod error;
mod message;
mod vault;

pub use error::VaultError;
pub use message::VaultMessage;
pub use vault::Vault;
