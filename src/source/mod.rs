pub mod file;
pub mod http;

pub use file::FileMapSource;
pub use http::HttpMapSource;

use crate::cache::TileStore;
use crate::core::geo::LatLngBounds;
use crate::core::projection::TileAddress;
use crate::Result;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Attribution strings a source may carry; every field is absent-if-unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attribution {
    pub short_name: Option<String>,
    pub short_attribution: Option<String>,
    pub long_description: Option<String>,
    pub long_attribution: Option<String>,
}

/// Capability interface for anything that can provide tile imagery.
///
/// Sources are created at configuration time, live for the session and are
/// shared read-only across loader threads.
pub trait MapSource: Send + Sync {
    /// Fetches raw image bytes for a tile. Blocks; runs on worker threads.
    ///
    /// `TileNotFound` means the source has no data for this address (shown
    /// as a "missing tile" placeholder); other errors mean the fetch itself
    /// failed (shown as an "error tile" placeholder).
    fn fetch_tile_bytes(&self, addr: TileAddress) -> Result<Vec<u8>>;

    /// Supported zoom levels
    fn zoom_range(&self) -> RangeInclusive<u8>;

    /// Side length of this source's tiles in pixels
    fn tile_side_length(&self) -> u32;

    /// Geographic region the source has data for, if bounded
    fn coverage_bounds(&self) -> Option<LatLngBounds> {
        None
    }

    /// Distinguishes this source's tiles from other sources sharing one
    /// cache. Must be stable across sessions for the persistent tier to be
    /// reusable.
    fn cache_partition_key(&self) -> &str;

    fn attribution(&self) -> Attribution {
        Attribution::default()
    }

    /// A source backed by its own tile database exposes it here so the
    /// cache can attach it as a read-only persistent tier.
    fn persistent_store(&self) -> Option<Arc<TileStore>> {
        None
    }

    /// Whether fetched tiles should be persisted to a writable cache store
    /// for offline reuse. True for remote sources, false for sources that
    /// already are a local store.
    fn wants_persistent_cache(&self) -> bool {
        self.persistent_store().is_none()
    }
}
