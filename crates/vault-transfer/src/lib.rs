//! Churn-driven account migration and key/value conflict resolution.
//!
//! [`MajorityTransfer`] is the shared primitive behind both
//! `AccountTransfer` (bulk hand-off of a persona's whole account set on
//! churn) and `KvTransfer` (single-key conflict resolution via an
//! `AccountQuery` round-trip) — both are this type, parameterised by the
//! account family's `Value`. [`ChurnEchoGuard`] stops a newly-joined node
//! from re-propagating a batch it just received until the next churn event.

mod churn;
mod transfer;

pub use churn::ChurnEchoGuard;
pub use transfer::{MajorityTransfer, TransferOutcome};

/// Bulk account hand-off on churn: one instance per persona, keyed by
/// account id.
pub type AccountTransfer<V> = MajorityTransfer<V>;

/// Single-key conflict resolution driven by an `AccountQuery` round-trip.
pub type KvTransfer<V> = MajorityTransfer<V>;
