use thiserror::Error;
use vault_dispatch::DispatchError;
use vault_storage::DbError;

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("timed out waiting for a holder response")]
    Timeout,

    #[error("no such element")]
    NoSuchElement,

    #[error("network health below minimum threshold")]
    FailedToJoinNetwork,
}
