//! Content-addressed cache: an at-most-one cached copy per data name,
//! populated opportunistically from observed responses and served directly
//! on later requests.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::trace;
use vault_types::DataNameVariant;

/// Default cache budget in number of entries, used when no explicit budget
/// is configured.
pub const DEFAULT_CAPACITY: usize = 1024;

/// An LRU cache from [`DataNameVariant`] to the last observed response body.
///
/// Eventually consistent with the underlying data by design: a stale entry
/// is tolerated until the variant is next written, at which point callers
/// evict it via [`CacheHandler::invalidate`].
pub struct CacheHandler {
    entries: Mutex<LruCache<DataNameVariant, Bytes>>,
}

impl CacheHandler {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity > 0");
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Stores `bytes` under `name`, evicting the least-recently-used entry
    /// if the cache is at capacity.
    pub fn put_to_cache(&self, name: DataNameVariant, bytes: Bytes) {
        self.entries.lock().put(name, bytes);
        trace!(?name, "populated cache entry");
    }

    /// Looks up `name`. Returns the cached bytes if present, refreshing its
    /// recency, or `None` on a miss.
    pub fn get_from_cache(&self, name: &DataNameVariant) -> Option<Bytes> {
        self.entries.lock().get(name).cloned()
    }

    /// Drops a stale entry, e.g. on a resolved write to the same name.
    pub fn invalidate(&self, name: &DataNameVariant) {
        self.entries.lock().pop(name);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheHandler {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
