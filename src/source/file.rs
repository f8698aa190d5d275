use crate::cache::{StoreMetadata, TileStore};
use crate::core::geo::LatLngBounds;
use crate::core::projection::{Projection, TileAddress};
use crate::source::{Attribution, MapSource};
use crate::{Result, TileError};
use log::warn;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;

/// Tile source backed by a local tile database.
///
/// The database is the source's own persistent tier and stays read-only; the
/// cache never writes fetched tiles back into it. Metadata comes from the
/// store's `preferences` table, parsed once at open time.
pub struct FileMapSource {
    partition_key: String,
    store: Arc<TileStore>,
    metadata: StoreMetadata,
    zoom_range: RangeInclusive<u8>,
    tile_side: u32,
}

impl FileMapSource {
    /// Opens a tile database. Fails with `StoreUnavailable` when the file
    /// cannot be opened or the mandatory preferences (`map.minZoom`,
    /// `map.maxZoom`, `map.tileSideLength`) are missing; optional metadata
    /// simply stays unset.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let store = Arc::new(TileStore::open_read_only(path)?);
        let partition_key = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Self::from_store(store, partition_key)
    }

    /// Builds a source over an already-open store. Used by tests and by
    /// callers that manage store lifetime themselves.
    pub fn from_store(store: Arc<TileStore>, partition_key: impl Into<String>) -> Result<Self> {
        let metadata = store.metadata()?;
        let (min_zoom, max_zoom, tile_side) =
            match (metadata.min_zoom, metadata.max_zoom, metadata.tile_side) {
                (Some(min), Some(max), Some(side)) => (min, max, side),
                _ => {
                    return Err(TileError::StoreUnavailable(
                        "mandatory preferences missing (map.minZoom, map.maxZoom, map.tileSideLength)"
                            .into(),
                    ))
                }
            };

        Ok(Self {
            partition_key: partition_key.into(),
            store,
            metadata,
            zoom_range: min_zoom..=max_zoom,
            tile_side,
        })
    }

    /// The projection configured for this source's tile geometry
    pub fn projection(&self) -> Projection {
        Projection::new(self.tile_side, *self.zoom_range.start(), *self.zoom_range.end())
    }

    fn covers(&self, addr: TileAddress) -> bool {
        match &self.metadata.coverage {
            Some(coverage) => tile_bounds(addr).intersects(coverage),
            None => true,
        }
    }
}

/// Geographic footprint of one tile
fn tile_bounds(addr: TileAddress) -> LatLngBounds {
    let n = (1u64 << addr.zoom) as f64;
    let lng_west = addr.x as f64 / n * 360.0 - 180.0;
    let lng_east = (addr.x + 1) as f64 / n * 360.0 - 180.0;
    let lat_north = tile_row_lat(addr.y as f64, n);
    let lat_south = tile_row_lat((addr.y + 1) as f64, n);
    LatLngBounds::from_coords(lat_south, lng_west, lat_north, lng_east)
}

fn tile_row_lat(row: f64, n: f64) -> f64 {
    let y = std::f64::consts::PI * (1.0 - 2.0 * row / n);
    y.sinh().atan().to_degrees()
}

impl MapSource for FileMapSource {
    fn fetch_tile_bytes(&self, addr: TileAddress) -> Result<Vec<u8>> {
        if !self.zoom_range.contains(&addr.zoom) || !self.covers(addr) {
            return Err(TileError::TileNotFound(addr));
        }

        match self.store.read_tile(addr.key()) {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(TileError::TileNotFound(addr)),
            Err(err) => {
                // A store read error degrades to a miss rather than failing
                // the viewport update.
                warn!("tile store read failed for {:?}: {}", addr, err);
                Err(TileError::TileNotFound(addr))
            }
        }
    }

    fn zoom_range(&self) -> RangeInclusive<u8> {
        self.zoom_range.clone()
    }

    fn tile_side_length(&self) -> u32 {
        self.tile_side
    }

    fn coverage_bounds(&self) -> Option<LatLngBounds> {
        self.metadata.coverage.clone()
    }

    fn cache_partition_key(&self) -> &str {
        &self.partition_key
    }

    fn attribution(&self) -> Attribution {
        self.metadata.attribution.clone()
    }

    fn persistent_store(&self) -> Option<Arc<TileStore>> {
        Some(self.store.clone())
    }
}
