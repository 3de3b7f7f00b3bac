//! Storage-layer error taxonomy.

use thiserror::Error;
use vault_types::ValueError;

#[derive(Debug, Error)]
pub enum DbError {
    /// An action's preconditions were violated against the current `Value`
    /// (no-such-account, account-already-exists, no-such-element).
    #[error(transparent)]
    Value(#[from] ValueError),

    /// An on-disk record failed to deserialise. Fatal for that key, but
    /// never poisons the rest of the database.
    #[error("parsing error: {0}")]
    ParsingError(String),

    /// The underlying filesystem operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// True for the account-error family that callers are expected to mute
    /// on specific idempotent paths.
    pub fn is_no_such_account(&self) -> bool {
        matches!(self, DbError::Value(ValueError::NoSuchAccount))
    }

    pub fn is_no_such_element(&self) -> bool {
        matches!(self, DbError::Value(ValueError::NoSuchElement))
    }
}
