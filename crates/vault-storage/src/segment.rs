//! A crash-safe, file-backed `KeyedDb`.
//!
//! # File layout
//!
//! ```text
//! {data_dir}/
//! ├── snapshot.json   <- last compacted full state
//! └── wal.log         <- newline-delimited JSON records appended since the
//!                        snapshot; replayed on open
//! ```
//!
//! Every `commit` appends one record to `wal.log` and `fsync`s it before
//! returning, then updates the in-memory index. `compact` folds the WAL into
//! a fresh snapshot and truncates it — a two-tier WAL-plus-snapshot pattern
//! applied here to a keyed map instead of an append-only event log.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use vault_types::{Key, MatrixChange, NodeId, Value, ValueError};

use crate::db::KeyedDb;
use crate::error::DbError;

const SNAPSHOT_FILENAME: &str = "snapshot.json";
const WAL_FILENAME: &str = "wal.log";

/// Number of WAL records appended before an automatic compaction.
const AUTO_COMPACT_THRESHOLD: usize = 4096;

#[derive(Serialize, Deserialize)]
enum WalRecord<V> {
    Put { key: Key, value: V },
    Remove { key: Key },
}

struct Inner<V> {
    index: BTreeMap<Key, V>,
    wal: File,
    records_since_snapshot: usize,
}

/// A `KeyedDb` persisted under `data_dir`, one directory per persona.
pub struct SegmentKeyedDb<V> {
    data_dir: PathBuf,
    inner: Mutex<Inner<V>>,
}

impl<V: Value> SegmentKeyedDb<V> {
    /// Opens (creating if absent) a durable database under `data_dir`,
    /// replaying `snapshot.json` + `wal.log` into memory.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, DbError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let mut index: BTreeMap<Key, V> = Self::load_snapshot(&data_dir)?;
        let records_replayed = Self::replay_wal(&data_dir, &mut index)?;

        let wal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join(WAL_FILENAME))?;

        Ok(Self {
            data_dir,
            inner: Mutex::new(Inner { index, wal, records_since_snapshot: records_replayed }),
        })
    }

    fn load_snapshot(data_dir: &Path) -> Result<BTreeMap<Key, V>, DbError> {
        let path = data_dir.join(SNAPSHOT_FILENAME);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let json = fs::read_to_string(&path)?;
        let entries: Vec<(Key, V)> = serde_json::from_str(&json)
            .map_err(|e| DbError::ParsingError(format!("{}: {e}", path.display())))?;
        Ok(entries.into_iter().collect())
    }

    fn replay_wal(data_dir: &Path, index: &mut BTreeMap<Key, V>) -> Result<usize, DbError> {
        let path = data_dir.join(WAL_FILENAME);
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(&path)?;
        let mut count = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // A truncated final line (crash mid-write) is dropped, not
            // fatal for the whole database.
            match serde_json::from_str::<WalRecord<V>>(&line) {
                Ok(WalRecord::Put { key, value }) => {
                    index.insert(key, value);
                    count += 1;
                }
                Ok(WalRecord::Remove { key }) => {
                    index.remove(&key);
                    count += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping corrupt WAL record on replay");
                }
            }
        }
        Ok(count)
    }

    /// Folds the WAL into `snapshot.json` and truncates it. Called
    /// automatically every [`AUTO_COMPACT_THRESHOLD`] commits, and may be
    /// called explicitly, e.g. before orderly shutdown.
    pub fn compact(&self) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        let entries: Vec<(&Key, &V)> = inner.index.iter().collect();
        let json = serde_json::to_string(&entries).map_err(|e| DbError::ParsingError(e.to_string()))?;
        fs::write(self.data_dir.join(SNAPSHOT_FILENAME), json)?;

        inner.wal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.data_dir.join(WAL_FILENAME))?;
        inner.records_since_snapshot = 0;
        Ok(())
    }

    fn append_record(inner: &mut Inner<V>, record: &WalRecord<V>) -> Result<(), DbError> {
        let line = serde_json::to_string(record).map_err(|e| DbError::ParsingError(e.to_string()))?;
        inner.wal.write_all(line.as_bytes())?;
        inner.wal.write_all(b"\n")?;
        inner.wal.sync_data()?;
        inner.records_since_snapshot += 1;
        Ok(())
    }
}

impl<V: Value> KeyedDb<V> for SegmentKeyedDb<V> {
    fn commit(&self, key: Key, action: V::Action) -> Result<V, DbError> {
        let (post, should_compact) = {
            let mut inner = self.inner.lock();
            let existing = inner.index.get(&key);
            let post = V::apply(existing, &action)?;
            Self::append_record(&mut inner, &WalRecord::Put { key, value: post.clone() })?;
            inner.index.insert(key, post.clone());
            (post, inner.records_since_snapshot >= AUTO_COMPACT_THRESHOLD)
        };
        if should_compact {
            self.compact()?;
        }
        Ok(post)
    }

    fn get(&self, key: &Key) -> Result<V, DbError> {
        self.inner
            .lock()
            .index
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::Value(ValueError::NoSuchElement))
    }

    fn get_transfer_info(
        &self,
        change: &MatrixChange,
        new_owner: &dyn Fn(&Key, &MatrixChange) -> Option<NodeId>,
    ) -> HashMap<NodeId, Vec<(Key, V)>> {
        let inner = self.inner.lock();
        let mut out: HashMap<NodeId, Vec<(Key, V)>> = HashMap::new();
        for (key, value) in inner.index.iter() {
            if let Some(owner) = new_owner(key, change) {
                out.entry(owner).or_default().push((*key, value.clone()));
            }
        }
        out
    }

    fn handle_transfer(&self, entries: Vec<(Key, V)>) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        for (key, value) in entries {
            let merged = match inner.index.get(&key) {
                Some(existing) => {
                    let mut merged = existing.clone();
                    merged.merge(&value);
                    merged
                }
                None => value,
            };
            Self::append_record(&mut inner, &WalRecord::Put { key, value: merged.clone() })?;
            inner.index.insert(key, merged);
        }
        Ok(())
    }

    fn remove(&self, key: &Key) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        inner.index.remove(key);
        Self::append_record(&mut inner, &WalRecord::Remove { key: *key })?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.lock().index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vault_types::{DataManagerAction, DataManagerValue, Identity};

    fn key(n: u8) -> Key {
        Key::immutable_chunk(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    #[test]
    fn commit_then_reopen_recovers_state() {
        let dir = tempdir().unwrap();
        {
            let db: SegmentKeyedDb<DataManagerValue> = SegmentKeyedDb::open(dir.path()).unwrap();
            db.commit(key(1), DataManagerAction::AddPmid { pmid: node(1), chunk_size: 4 }).unwrap();
        }
        let reopened: SegmentKeyedDb<DataManagerValue> = SegmentKeyedDb::open(dir.path()).unwrap();
        let v = reopened.get(&key(1)).unwrap();
        assert_eq!(v.subscribers, 1);
    }

    #[test]
    fn remove_then_reopen_does_not_resurrect_the_record() {
        let dir = tempdir().unwrap();
        {
            let db: SegmentKeyedDb<DataManagerValue> = SegmentKeyedDb::open(dir.path()).unwrap();
            db.commit(key(1), DataManagerAction::AddPmid { pmid: node(1), chunk_size: 4 }).unwrap();
            db.remove(&key(1)).unwrap();
        }
        let reopened: SegmentKeyedDb<DataManagerValue> = SegmentKeyedDb::open(dir.path()).unwrap();
        assert!(reopened.get(&key(1)).is_err());
    }

    #[test]
    fn compact_preserves_state_and_truncates_wal() {
        let dir = tempdir().unwrap();
        let db: SegmentKeyedDb<DataManagerValue> = SegmentKeyedDb::open(dir.path()).unwrap();
        db.commit(key(1), DataManagerAction::AddPmid { pmid: node(1), chunk_size: 4 }).unwrap();
        db.compact().unwrap();
        let wal_len = fs::metadata(dir.path().join(WAL_FILENAME)).unwrap().len();
        assert_eq!(wal_len, 0);
        let v = db.get(&key(1)).unwrap();
        assert_eq!(v.subscribers, 1);
    }
}
