//! The [`Value`] trait and the concrete account records each persona keeps.
//!
//! `Value` is intentionally thin: everything the replicated engine needs to
//! know about a record family is `apply` (deterministic action application)
//! and `merge` (conflict resolution on transfer, used by `HandleTransfer`).
//! Concrete families (Data Manager, Maid Manager, Pmid Manager) live in this
//! module so [`vault-storage`](../vault_storage) stays generic over `Value`.

use std::collections::BTreeSet;
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::ids::NodeId;

/// Errors raised while applying an [`Action`](Value::Action) to a `Value`,
/// or while looking one up. Shared taxonomy for every account family.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    /// The action requires an existing account but none was found.
    #[error("no such account")]
    NoSuchAccount,
    /// A create-family action targeted a key that already exists.
    #[error("account already exists")]
    AccountAlreadyExists,
    /// A lookup (not an action application) found nothing for the key.
    #[error("no such element")]
    NoSuchElement,
}

/// A deterministic, per-family command that transforms a [`Value`].
///
/// Every action family carries a stable discriminator via
/// [`ActionKind::is_create`] so [`vault-storage`](../vault_storage)'s
/// `Commit` knows whether an absent key is an error or an implicit create.
pub trait ActionKind: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// True if this action may create a key that does not yet exist.
    fn is_create(&self) -> bool;
}

/// A record family replicated by the engine: Data Manager's holder-set
/// record, a Maid Manager account, a Pmid Manager account, ...
pub trait Value: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Action: ActionKind;

    /// Applies `action` against the current state (`None` if the key is
    /// absent) and returns the resulting post-state.
    fn apply(existing: Option<&Self>, action: &Self::Action) -> Result<Self, ValueError>;

    /// Merges `other` into `self` in place, per the family's convergent
    /// resolution rule. Used by `KeyedDb::HandleTransfer` (bulk upsert) and
    /// by `AccountTransfer` conflict resolution. Must be idempotent:
    /// `v.merge(&v.clone())` is a no-op.
    fn merge(&mut self, other: &Self);
}

// ---------------------------------------------------------------------
// Data Manager: the reference record — the richest of the account families.
// ---------------------------------------------------------------------

/// Data Manager's per-key record: who subscribes, how big the chunk is, and
/// which Pmids hold a copy (and which of those are currently online).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataManagerValue {
    pub subscribers: u64,
    pub chunk_size: u64,
    pub all_pmids: BTreeSet<NodeId>,
    pub online_pmids: BTreeSet<NodeId>,
}

impl DataManagerValue {
    pub fn new(chunk_size: u64, first_holder: NodeId) -> Self {
        let mut all_pmids = BTreeSet::new();
        all_pmids.insert(first_holder);
        Self {
            subscribers: 1,
            chunk_size,
            all_pmids,
            online_pmids: BTreeSet::new(),
        }
    }

    /// Invariant check used by tests and by `KeyedDb` before committing:
    /// online holders are always a subset of known holders.
    pub fn is_consistent(&self, replication_bound: usize) -> bool {
        self.online_pmids.is_subset(&self.all_pmids) && self.all_pmids.len() <= replication_bound
    }
}

/// Action family for [`DataManagerValue`]. One variant per resolved action
/// the Data Manager's sync logs carry across its put/get/delete/liveness
/// pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataManagerAction {
    /// A resolved put: either creates the key (if absent) or increments
    /// `subscribers`.
    Put { chunk_size: u64 },
    /// A holder accepted the chunk.
    AddPmid { pmid: NodeId, chunk_size: u64 },
    /// A holder failed to accept (or lost) the chunk.
    RemovePmid { pmid: NodeId },
    /// A resolved delete: decrements `subscribers`.
    Delete,
    /// Liveness: a holder came online.
    SetPmidOnline { pmid: NodeId },
    /// Liveness: a holder went offline.
    SetPmidOffline { pmid: NodeId },
}

impl ActionKind for DataManagerAction {
    fn is_create(&self) -> bool {
        // A record is only materialised once a holder has actually accepted
        // the chunk; a bare Put on content nobody holds yet has no
        // `all_pmids` to create a record around.
        matches!(self, DataManagerAction::AddPmid { .. })
    }
}

impl Value for DataManagerValue {
    type Action = DataManagerAction;

    fn apply(existing: Option<&Self>, action: &Self::Action) -> Result<Self, ValueError> {
        match (existing, action) {
            (None, DataManagerAction::Put { .. }) => Err(ValueError::NoSuchAccount),
            (Some(v), DataManagerAction::Put { .. }) => {
                let mut v = v.clone();
                v.subscribers += 1;
                Ok(v)
            }
            (None, DataManagerAction::AddPmid { pmid, chunk_size }) => {
                Ok(DataManagerValue::new(*chunk_size, *pmid))
            }
            (Some(v), DataManagerAction::AddPmid { pmid, .. }) => {
                let mut v = v.clone();
                v.all_pmids.insert(*pmid);
                Ok(v)
            }
            (None, DataManagerAction::RemovePmid { .. }) => Err(ValueError::NoSuchAccount),
            (Some(v), DataManagerAction::RemovePmid { pmid }) => {
                let mut v = v.clone();
                v.all_pmids.remove(pmid);
                v.online_pmids.remove(pmid);
                Ok(v)
            }
            (None, DataManagerAction::Delete) => Err(ValueError::NoSuchAccount),
            (Some(v), DataManagerAction::Delete) => {
                let mut v = v.clone();
                v.subscribers = v.subscribers.saturating_sub(1);
                Ok(v)
            }
            (None, DataManagerAction::SetPmidOnline { .. } | DataManagerAction::SetPmidOffline { .. }) => {
                Err(ValueError::NoSuchAccount)
            }
            (Some(v), DataManagerAction::SetPmidOnline { pmid }) => {
                let mut v = v.clone();
                if v.all_pmids.contains(pmid) {
                    v.online_pmids.insert(*pmid);
                }
                Ok(v)
            }
            (Some(v), DataManagerAction::SetPmidOffline { pmid }) => {
                let mut v = v.clone();
                v.online_pmids.remove(pmid);
                Ok(v)
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        self.subscribers = self.subscribers.max(other.subscribers);
        self.chunk_size = self.chunk_size.max(other.chunk_size);
        self.all_pmids.extend(other.all_pmids.iter().copied());
        self.online_pmids.extend(other.online_pmids.iter().copied());
        self.online_pmids.retain(|p| self.all_pmids.contains(p));
    }
}

// ---------------------------------------------------------------------
// Maid Manager: per-client account, extended with Pmid registrations
// carried forward so they survive account transfer, the same role the
// original vault's PmidTotals record played.
// ---------------------------------------------------------------------

/// A storage-node registration a client has authorised, carried on the Maid
/// account so it survives account transfer the same way the original
/// vault's `PmidTotals` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmidRegistration {
    pub pmid: NodeId,
    pub stored_total_size: u64,
    pub lost_total_size: u64,
}

/// Maid Manager's per-client account: allowance accounting plus the set of
/// Pmids this client has registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaidAccount {
    pub data_stored: u64,
    pub space_offered: u64,
    pub registrations: Vec<PmidRegistration>,
}

impl MaidAccount {
    pub fn new(space_offered: u64) -> Self {
        Self { data_stored: 0, space_offered, registrations: Vec::new() }
    }

    pub fn space_available(&self) -> u64 {
        self.space_offered.saturating_sub(self.data_stored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaidAccountAction {
    CreateAccount { space_offered: u64 },
    PutData { size: u64 },
    DeleteData { size: u64 },
    RegisterPmid(PmidRegistration),
}

impl ActionKind for MaidAccountAction {
    fn is_create(&self) -> bool {
        matches!(self, MaidAccountAction::CreateAccount { .. })
    }
}

impl Value for MaidAccount {
    type Action = MaidAccountAction;

    fn apply(existing: Option<&Self>, action: &Self::Action) -> Result<Self, ValueError> {
        match (existing, action) {
            (None, MaidAccountAction::CreateAccount { space_offered }) => {
                Ok(MaidAccount::new(*space_offered))
            }
            (Some(_), MaidAccountAction::CreateAccount { .. }) => {
                Err(ValueError::AccountAlreadyExists)
            }
            (None, _) => Err(ValueError::NoSuchAccount),
            (Some(v), MaidAccountAction::PutData { size }) => {
                let mut v = v.clone();
                v.data_stored += size;
                Ok(v)
            }
            (Some(v), MaidAccountAction::DeleteData { size }) => {
                let mut v = v.clone();
                v.data_stored = v.data_stored.saturating_sub(*size);
                Ok(v)
            }
            (Some(v), MaidAccountAction::RegisterPmid(reg)) => {
                let mut v = v.clone();
                if let Some(existing) = v.registrations.iter_mut().find(|r| r.pmid == reg.pmid) {
                    *existing = reg.clone();
                } else {
                    v.registrations.push(reg.clone());
                }
                Ok(v)
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        self.data_stored = self.data_stored.max(other.data_stored);
        self.space_offered = self.space_offered.max(other.space_offered);
        for reg in &other.registrations {
            if let Some(existing) = self.registrations.iter_mut().find(|r| r.pmid == reg.pmid) {
                existing.stored_total_size = existing.stored_total_size.max(reg.stored_total_size);
                existing.lost_total_size = existing.lost_total_size.max(reg.lost_total_size);
            } else {
                self.registrations.push(reg.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------
// Pmid Manager: per-holder usage accounting.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmidAccount {
    pub stored_total_size: u64,
    pub lost_total_size: u64,
}

impl PmidAccount {
    pub fn new() -> Self {
        Self { stored_total_size: 0, lost_total_size: 0 }
    }
}

impl Default for PmidAccount {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmidAccountAction {
    RecordStore { size: u64 },
    RecordLoss { size: u64 },
}

impl ActionKind for PmidAccountAction {
    fn is_create(&self) -> bool {
        true
    }
}

impl Value for PmidAccount {
    type Action = PmidAccountAction;

    fn apply(existing: Option<&Self>, action: &Self::Action) -> Result<Self, ValueError> {
        let mut v = existing.cloned().unwrap_or_default();
        match action {
            PmidAccountAction::RecordStore { size } => v.stored_total_size += size,
            PmidAccountAction::RecordLoss { size } => {
                v.stored_total_size = v.stored_total_size.saturating_sub(*size);
                v.lost_total_size += size;
            }
        }
        Ok(v)
    }

    fn merge(&mut self, other: &Self) {
        self.stored_total_size = self.stored_total_size.max(other.stored_total_size);
        self.lost_total_size = self.lost_total_size.max(other.lost_total_size);
    }
}

// ---------------------------------------------------------------------
// Version Handler: mutable structured data, tracked as a linear version
// history rather than a holder set.
// ---------------------------------------------------------------------

/// A mutable-data/directory record: the ordered history of content
/// identities it has pointed to. The current version is always the last
/// entry; the full history is kept so conflicting concurrent updates can be
/// reconciled deterministically rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryValue {
    pub owner: NodeId,
    pub versions: Vec<NodeId>,
}

impl VersionHistoryValue {
    pub fn current(&self) -> Option<NodeId> {
        self.versions.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionHistoryAction {
    Create { owner: NodeId, initial_version: NodeId },
    PutVersion { version: NodeId },
    Delete,
}

impl ActionKind for VersionHistoryAction {
    fn is_create(&self) -> bool {
        matches!(self, VersionHistoryAction::Create { .. })
    }
}

impl Value for VersionHistoryValue {
    type Action = VersionHistoryAction;

    fn apply(existing: Option<&Self>, action: &Self::Action) -> Result<Self, ValueError> {
        match (existing, action) {
            (None, VersionHistoryAction::Create { owner, initial_version }) => {
                Ok(VersionHistoryValue { owner: *owner, versions: vec![*initial_version] })
            }
            (Some(_), VersionHistoryAction::Create { .. }) => Err(ValueError::AccountAlreadyExists),
            (None, _) => Err(ValueError::NoSuchAccount),
            (Some(v), VersionHistoryAction::PutVersion { version }) => {
                let mut v = v.clone();
                v.versions.push(*version);
                Ok(v)
            }
            (Some(v), VersionHistoryAction::Delete) => {
                let mut v = v.clone();
                v.versions.clear();
                Ok(v)
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        if other.versions.len() > self.versions.len() {
            self.versions = other.versions.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8) -> NodeId {
        NodeId::from([b; crate::ids::IDENTITY_BYTES])
    }

    #[test]
    fn add_pmid_creates_account_with_one_subscriber() {
        let v = DataManagerValue::apply(None, &DataManagerAction::AddPmid { pmid: node(1), chunk_size: 256 })
            .unwrap();
        assert_eq!(v.subscribers, 1);
        assert!(v.all_pmids.contains(&node(1)));
    }

    #[test]
    fn put_on_absent_key_is_no_such_account() {
        let err = DataManagerValue::apply(None, &DataManagerAction::Put { chunk_size: 256 }).unwrap_err();
        assert_eq!(err, ValueError::NoSuchAccount);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut v = DataManagerValue::new(256, node(1));
        let snapshot = v.clone();
        v.merge(&snapshot.clone());
        assert_eq!(v, snapshot);
    }

    #[test]
    fn merge_unions_holder_sets_and_keeps_online_subset() {
        let mut a = DataManagerValue::new(256, node(1));
        a.online_pmids.insert(node(1));
        let b = DataManagerValue::new(256, node(2));
        a.merge(&b);
        assert_eq!(a.all_pmids, [node(1), node(2)].into_iter().collect());
        assert!(a.online_pmids.is_subset(&a.all_pmids));
    }
}
