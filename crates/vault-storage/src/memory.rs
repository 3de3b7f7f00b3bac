//! An in-memory `KeyedDb`, used by tests and by `--development` vaults.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use vault_types::{Key, MatrixChange, NodeId, Value, ValueError};

use crate::db::KeyedDb;
use crate::error::DbError;

/// A `BTreeMap`-backed `KeyedDb` with no persistence. Every `commit` is
/// serialised through a single mutex, matching the "serialisable with
/// respect to concurrent commits on the same key" requirement trivially.
pub struct MemoryKeyedDb<V: Value> {
    state: Mutex<BTreeMap<Key, V>>,
}

impl<V: Value> MemoryKeyedDb<V> {
    pub fn new() -> Self {
        Self { state: Mutex::new(BTreeMap::new()) }
    }
}

impl<V: Value> Default for MemoryKeyedDb<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Value> KeyedDb<V> for MemoryKeyedDb<V> {
    fn commit(&self, key: Key, action: V::Action) -> Result<V, DbError> {
        let mut state = self.state.lock();
        let existing = state.get(&key);
        let post = V::apply(existing, &action)?;
        state.insert(key, post.clone());
        Ok(post)
    }

    fn get(&self, key: &Key) -> Result<V, DbError> {
        self.state
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::Value(ValueError::NoSuchElement))
    }

    fn get_transfer_info(
        &self,
        change: &MatrixChange,
        new_owner: &dyn Fn(&Key, &MatrixChange) -> Option<NodeId>,
    ) -> HashMap<NodeId, Vec<(Key, V)>> {
        let state = self.state.lock();
        let mut out: HashMap<NodeId, Vec<(Key, V)>> = HashMap::new();
        for (key, value) in state.iter() {
            if let Some(owner) = new_owner(key, change) {
                out.entry(owner).or_default().push((*key, value.clone()));
            }
        }
        out
    }

    fn handle_transfer(&self, entries: Vec<(Key, V)>) -> Result<(), DbError> {
        let mut state = self.state.lock();
        for (key, value) in entries {
            state
                .entry(key)
                .and_modify(|existing| existing.merge(&value))
                .or_insert(value);
        }
        Ok(())
    }

    fn remove(&self, key: &Key) -> Result<(), DbError> {
        self.state.lock().remove(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.state.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_types::{DataManagerAction, DataManagerValue, Identity};

    fn key(n: u8) -> Key {
        Key::immutable_chunk(Identity::from([n; vault_types::IDENTITY_BYTES]))
    }

    fn node(n: u8) -> NodeId {
        Identity::from([n; vault_types::IDENTITY_BYTES])
    }

    #[test]
    fn commit_on_absent_key_requires_create_action() {
        let db: MemoryKeyedDb<DataManagerValue> = MemoryKeyedDb::new();
        let err = db.commit(key(1), DataManagerAction::Put { chunk_size: 4 }).unwrap_err();
        assert!(err.is_no_such_account());
    }

    #[test]
    fn handle_transfer_is_idempotent() {
        let db: MemoryKeyedDb<DataManagerValue> = MemoryKeyedDb::new();
        let value = DataManagerValue::new(4, node(9));
        let entries = vec![(key(1), value.clone())];
        db.handle_transfer(entries.clone()).unwrap();
        let once = db.get(&key(1)).unwrap();
        db.handle_transfer(entries).unwrap();
        let twice = db.get(&key(1)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn remove_drops_the_record() {
        let db: MemoryKeyedDb<DataManagerValue> = MemoryKeyedDb::new();
        db.commit(key(1), DataManagerAction::AddPmid { pmid: node(1), chunk_size: 4 }).unwrap();
        db.remove(&key(1)).unwrap();
        assert!(db.get(&key(1)).is_err());
    }

    #[test]
    fn remove_of_absent_key_is_not_an_error() {
        let db: MemoryKeyedDb<DataManagerValue> = MemoryKeyedDb::new();
        db.remove(&key(1)).unwrap();
    }

    #[test]
    fn get_transfer_info_does_not_mutate() {
        let db: MemoryKeyedDb<DataManagerValue> = MemoryKeyedDb::new();
        db.commit(key(1), DataManagerAction::AddPmid { pmid: node(1), chunk_size: 4 }).unwrap();
        let change = MatrixChange::new(vec![node(1)], vec![node(2)]);
        let _ = db.get_transfer_info(&change, &|_, _| Some(node(2)));
        assert_eq!(db.len(), 1);
        assert!(db.get(&key(1)).is_ok());
    }
}
