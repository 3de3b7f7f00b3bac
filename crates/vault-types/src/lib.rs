//! # vault-types: shared domain types for the vault replicated storage engine
//!
//! This crate contains the types every other crate in the workspace builds
//! on:
//! - Identities ([`NodeId`], [`GroupId`])
//! - Keys and the data-name dispatch variant ([`Key`], [`DataNameVariant`])
//! - Records and actions per persona ([`Value`], [`DataManagerValue`],
//!   [`MaidAccount`], [`PmidAccount`])
//! - The message envelope and authority model ([`Envelope`], [`Authority`])
//! - Close-group membership changes ([`MatrixChange`])
//!
//! Nothing here depends on I/O, networking, or concurrency — those concerns
//! live in `vault-storage`, `vault-dispatch`, and `vault-persona`.

mod ids;
mod key;
mod matrix;
mod message;
mod value;

pub use ids::{Identity, GroupId, NodeId, IDENTITY_BYTES};
pub use key::{DataNameVariant, DataTypeTag, Key};
pub use matrix::MatrixChange;
pub use message::{Authority, Envelope, MessageId};
pub use value::{
    ActionKind, DataManagerAction, DataManagerValue, MaidAccount, MaidAccountAction, PmidAccount,
    PmidAccountAction, PmidRegistration, Value, ValueError, VersionHistoryAction, VersionHistoryValue,
};
