//! The `test` operation: stores a set of chunks, fetches each back, and
//! deletes one of them, exercising [`vault_persona::ChunkStore`] the way the
//! bootstrap tool's original chunk-store smoke test exercised a live vault.

use std::path::Path;

use bytes::Bytes;
use rand::RngCore;
use vault_persona::{ChunkStore, ChunkStoreError, FsChunkStore};
use vault_types::Identity;

/// Size of each generated test chunk.
const CHUNK_SIZE: usize = 1 << 18;

#[derive(Debug)]
pub struct Report {
    pub stored: usize,
    pub verified: usize,
    pub deleted: Option<Identity>,
}

/// Generates `chunk_set_count` random chunks under `chunk_path`, reads each
/// back to confirm the bytes round-trip, then deletes the chunk at
/// `chunk_index` (if one was generated) and confirms it is gone.
pub fn run(chunk_path: &Path, chunk_set_count: usize, chunk_index: usize) -> Result<Report, ChunkStoreError> {
    let store = FsChunkStore::open(chunk_path)?;
    let mut rng = rand::thread_rng();
    let mut names = Vec::with_capacity(chunk_set_count);

    for _ in 0..chunk_set_count {
        let mut content = vec![0u8; CHUNK_SIZE];
        rng.fill_bytes(&mut content);
        let content = Bytes::from(content);
        let name = Identity::derive_from(&content);
        store.put(name, content)?;
        names.push(name);
    }

    let mut verified = 0;
    for name in &names {
        store.get(name)?;
        verified += 1;
    }

    let deleted = if let Some(name) = names.get(chunk_index) {
        store.delete(name)?;
        match store.get(name) {
            Err(ChunkStoreError::NotFound) => {}
            Err(e) => return Err(e),
            Ok(_) => return Err(ChunkStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "deleted chunk is still readable",
            ))),
        }
        Some(*name)
    } else {
        None
    };

    Ok(Report { stored: names.len(), verified, deleted })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_verifies_and_deletes_the_selected_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(dir.path(), 3, 1).unwrap();

        assert_eq!(report.stored, 3);
        assert_eq!(report.verified, 3);
        assert!(report.deleted.is_some());
    }

    #[test]
    fn out_of_range_chunk_index_skips_the_delete_step() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(dir.path(), 1, 5).unwrap();

        assert!(report.deleted.is_none());
    }
}
