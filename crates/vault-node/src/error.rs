//! Top-level vault process error, composed from every collaborator crate's
//! own leaf error enum.

use thiserror::Error;
use vault_config::ConfigError;
use vault_dispatch::DispatchError;
use vault_persona::{ChunkStoreError, PersonaError};
use vault_storage::DbError;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Db(#[from] DbError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("persona error: {0}")]
    Persona(#[from] PersonaError),

    #[error("chunk store error: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed inbound message: {0}")]
    Malformed(#[from] postcard::Error),

    #[error("network health {observed} below minimum {required}, refusing to accept work")]
    FailedToJoinNetwork { observed: i32, required: i32 },
}
