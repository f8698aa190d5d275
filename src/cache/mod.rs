//! Tiered tile cache: a bounded in-memory LRU tier over per-source
//! persistent sqlite stores.
//!
//! `fetch` checks memory first, then the source's persistent tier; a
//! persistent hit populates the memory tier. Writes are source-specific: a
//! remote source's store is writable (fetched tiles are persisted for
//! offline reuse), a file-backed source's store participates read-only.

pub mod memory;
pub mod store;

pub use memory::{MemoryCacheConfig, MemoryTileCache};
pub use store::{StoreMetadata, TileStore};

use crate::core::projection::TileAddress;
use log::warn;
use memory::CacheKey;
use std::sync::{Arc, Mutex};

struct PersistentTier {
    store: Arc<TileStore>,
    writable: bool,
}

/// Two-tier tile cache shared across tile sources, keyed by
/// `(cache partition key, tile key)`.
pub struct TileCache {
    memory: MemoryTileCache,
    tiers: Mutex<fxhash::FxHashMap<Arc<str>, PersistentTier>>,
}

impl TileCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            memory: MemoryTileCache::new(config),
            tiers: Mutex::new(fxhash::FxHashMap::default()),
        }
    }

    /// Attaches a persistent tier for one source partition. `writable`
    /// should be true for remote-source caches and false for file-backed
    /// stores.
    pub fn attach_store(&self, partition: &Arc<str>, store: Arc<TileStore>, writable: bool) {
        if let Ok(mut tiers) = self.tiers.lock() {
            tiers.insert(
                partition.clone(),
                PersistentTier { store, writable },
            );
        }
    }

    /// Looks up tile bytes: memory tier first, then the persistent tier.
    /// A persistent hit is promoted into the memory tier. Persistent read
    /// errors are logged and treated as a miss, never fatal.
    pub fn fetch(&self, partition: &Arc<str>, addr: TileAddress) -> Option<Arc<Vec<u8>>> {
        let key = CacheKey {
            partition: partition.clone(),
            key: addr.key(),
        };
        if let Some(bytes) = self.memory.get(&key) {
            return Some(bytes);
        }

        let store = self.persistent_store(partition)?;
        match store.read_tile(addr.key()) {
            Ok(Some(bytes)) => {
                let bytes = Arc::new(bytes);
                self.memory.put(key, bytes.clone());
                Some(bytes)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("persistent tile read failed for {:?}: {}", addr, err);
                None
            }
        }
    }

    /// Looks up tile bytes in the memory tier only. Cheap enough for the
    /// interactive thread; the persistent tier is consulted on workers.
    pub fn fetch_memory(&self, partition: &Arc<str>, addr: TileAddress) -> Option<Arc<Vec<u8>>> {
        self.memory.get(&CacheKey {
            partition: partition.clone(),
            key: addr.key(),
        })
    }

    /// Stores tile bytes in both tiers (persistent only when that source's
    /// tier is writable).
    pub fn store(&self, partition: &Arc<str>, addr: TileAddress, bytes: Arc<Vec<u8>>) {
        self.memory.put(
            CacheKey {
                partition: partition.clone(),
                key: addr.key(),
            },
            bytes.clone(),
        );
        self.store_persistent_only(partition, addr, &bytes);
    }

    /// Persistent-tier write without touching the memory tier. Used when a
    /// fetch completed after its tile was cancelled: the bytes are still
    /// worth keeping for a later visit, but nothing should publish them now.
    pub fn store_persistent_only(&self, partition: &Arc<str>, addr: TileAddress, bytes: &[u8]) {
        let Some(store) = self.writable_store(partition) else {
            return;
        };
        if let Err(err) = store.write_tile(addr.key(), bytes) {
            warn!("persistent tile write failed for {:?}: {}", addr, err);
        }
    }

    /// Drops a tile from both tiers, e.g. when cached bytes fail to decode
    /// so a retry can refetch.
    pub fn evict(&self, partition: &Arc<str>, addr: TileAddress) {
        self.memory.remove(&CacheKey {
            partition: partition.clone(),
            key: addr.key(),
        });
        if let Some(store) = self.writable_store(partition) {
            if let Err(err) = store.delete_tile(addr.key()) {
                warn!("persistent tile delete failed for {:?}: {}", addr, err);
            }
        }
    }

    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    fn persistent_store(&self, partition: &Arc<str>) -> Option<Arc<TileStore>> {
        let tiers = self.tiers.lock().ok()?;
        tiers.get(partition).map(|t| t.store.clone())
    }

    fn writable_store(&self, partition: &Arc<str>) -> Option<Arc<TileStore>> {
        let tiers = self.tiers.lock().ok()?;
        tiers
            .get(partition)
            .filter(|t| t.writable && t.store.is_writable())
            .map(|t| t.store.clone())
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}
