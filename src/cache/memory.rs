use crate::core::projection::TileKey;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Budgets for the in-memory tile tier
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of cached tiles
    pub max_tiles: usize,
    /// Maximum total bytes of cached tile data
    pub max_bytes: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_tiles: 2048,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Cache key: tiles from different sources share one cache, partitioned by
/// the source's cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub partition: Arc<str>,
    pub key: TileKey,
}

/// Bounded LRU memory tier for raw tile bytes.
///
/// Lookups and mutation go through one lightweight mutex; entries are shared
/// out as `Arc<Vec<u8>>` so readers never hold the lock while using bytes.
#[derive(Debug)]
pub struct MemoryTileCache {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    map: LruCache<CacheKey, Arc<Vec<u8>>>,
    bytes: usize,
    max_bytes: usize,
}

impl MemoryTileCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_tiles)
            .unwrap_or_else(|| NonZeroUsize::new(2048).unwrap());
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::new(capacity),
                bytes: 0,
                max_bytes: config.max_bytes,
            }),
        }
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock().ok()?;
        inner.map.get(key).cloned()
    }

    pub(crate) fn put(&self, key: CacheKey, data: Arc<Vec<u8>>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.bytes += data.len();
        // push reports both a same-key replacement and a count-capacity
        // eviction; either way those bytes are gone.
        if let Some((_, old)) = inner.map.push(key, data) {
            inner.bytes -= old.len();
        }

        // The byte budget evicts least-recently-used entries here.
        while inner.bytes > inner.max_bytes {
            match inner.map.pop_lru() {
                Some((_, evicted)) => inner.bytes -= evicted.len(),
                None => break,
            }
        }
    }

    pub(crate) fn remove(&self, key: &CacheKey) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(old) = inner.map.pop(key) {
                inner.bytes -= old.len();
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.map.clear();
            inner.bytes = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.inner.lock().map(|i| i.bytes).unwrap_or(0)
    }
}
