//! # vault-sync: the reliable-delivery core
//!
//! Three collaborators every persona composes:
//! - [`Accumulator`]: dedupes incoming copies of a request until a quorum of
//!   distinct senders is observed.
//! - [`SyncLog`]: per-key, per-action-family log of actions awaiting group
//!   quorum, one instance per family per persona.
//! - [`DeadlineTimer`]: folds responses into a task until a required count
//!   arrives or a timeout fires.

mod accumulator;
mod deadline_timer;
mod sync_log;

pub use accumulator::{AddResult, Accumulator};
pub use deadline_timer::{DeadlineTimer, TaskId};
pub use sync_log::{majority_quorum, ResolvedAction, SyncLog, UnresolvedAction};
