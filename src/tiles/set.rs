//! The set of tiles currently displayed for one zoom level.

use crate::cache::{TileCache, TileStore};
use crate::core::bounds::Bounds;
use crate::core::geo::Point;
use crate::core::projection::{TileAddress, TileRect};
use crate::render::TileDisplay;
use crate::source::MapSource;
use crate::tiles::events::{SharedObserver, TileEvent};
use crate::tiles::image::{TileImage, TileState};
use crate::tiles::loader::{FetchHandle, FetchJob, FetchOutcome};
use crate::TileError;
use fxhash::FxHashMap;
use log::warn;
use std::sync::Arc;

/// Owns the mapping from tile address to [`TileImage`] for the tiles
/// relevant to one zoom level, and diffs it against each new target rect.
///
/// Mutated only from the interactive thread by loader-driven operations;
/// fetches themselves run on the worker pool.
pub struct TileSet {
    source: Arc<dyn MapSource>,
    partition: Arc<str>,
    cache: Arc<TileCache>,
    fetch: FetchHandle,
    observer: SharedObserver,
    zoom: u8,
    tiles: FxHashMap<TileAddress, TileImage>,
}

impl TileSet {
    pub fn new(
        source: Arc<dyn MapSource>,
        cache: Arc<TileCache>,
        fetch: FetchHandle,
        observer: SharedObserver,
    ) -> Self {
        let partition: Arc<str> = Arc::from(source.cache_partition_key());

        // A source backed by its own tile database contributes it to the
        // cache as a read-only persistent tier.
        if let Some(store) = source.persistent_store() {
            cache.attach_store(&partition, store, false);
        }

        Self {
            source,
            partition,
            cache,
            fetch,
            observer,
            zoom: 0,
            tiles: FxHashMap::default(),
        }
    }

    /// Attaches a writable persistent cache store for this source's
    /// partition, consulting the source's caching preference. Sources that
    /// already are a local store keep their read-only tier untouched.
    pub fn attach_offline_store(&self, store: Arc<TileStore>) {
        if self.source.wants_persistent_cache() {
            self.cache.attach_store(&self.partition, store, true);
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: u8) {
        self.zoom = zoom;
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, addr: &TileAddress) -> bool {
        self.tiles.contains_key(addr)
    }

    pub fn state_of(&self, addr: &TileAddress) -> Option<TileState> {
        self.tiles.get(addr).map(|t| t.state())
    }

    pub fn screen_location_of(&self, addr: &TileAddress) -> Option<Bounds> {
        self.tiles.get(addr).map(|t| t.screen_location().clone())
    }

    /// Ensures every address in `target` has a tile, placing each one within
    /// `display_bounds` by its offset in the rect. Missing tiles get load
    /// requests; tiles already present are re-placed without reloading.
    /// Returns the screen rectangle actually covered.
    pub fn load_tiles(
        &mut self,
        target: &TileRect,
        display_bounds: &Bounds,
        display: &mut dyn TileDisplay,
    ) -> Bounds {
        if target.width == 0 || target.height == 0 {
            return display_bounds.clone();
        }

        let side_x = display_bounds.width() / target.width as f64;
        let side_y = display_bounds.height() / target.height as f64;
        let mut achieved = Bounds::empty();

        let n = 1u64 << target.origin.zoom;
        for row in 0..target.height {
            for col in 0..target.width {
                let addr = TileAddress::new(
                    ((target.origin.x as u64 + col as u64) % n) as u32,
                    target.origin.y + row,
                    target.origin.zoom,
                );
                let placement = Bounds::from_origin_and_size(
                    Point::new(
                        display_bounds.min.x + col as f64 * side_x,
                        display_bounds.min.y + row as f64 * side_y,
                    ),
                    side_x,
                    side_y,
                );
                achieved.extend_bounds(&placement);

                if let Some(tile) = self.tiles.get_mut(&addr) {
                    tile.set_screen_location(placement.clone());
                    if let Some(surface) = tile.content() {
                        display.show_tile(addr, surface, placement);
                    }
                    continue;
                }

                let mut tile = TileImage::new(addr, placement.clone());
                self.observer.on_tile_event(TileEvent::Requested(addr));
                tile.mark_loading();

                // Memory tier only on the interactive thread; the persistent
                // tier and the remote fetch run on workers.
                match self.cache.fetch_memory(&self.partition, addr) {
                    Some(bytes) => match tile.update(&bytes, self.observer.as_ref()) {
                        Ok(()) => {
                            if let Some(surface) = tile.content() {
                                display.show_tile(addr, surface, placement);
                            }
                        }
                        Err(TileError::CacheCorruption) => {
                            warn!("corrupt cached tile {:?}, refetching", addr);
                            self.cache.evict(&self.partition, addr);
                            self.submit_fetch(&tile);
                        }
                        Err(err) => {
                            warn!("tile {:?} failed: {}", addr, err);
                            tile.resolve_error(self.observer.as_ref());
                        }
                    },
                    None => self.submit_fetch(&tile),
                }

                self.tiles.insert(addr, tile);
            }
        }

        achieved
    }

    /// Applies a completed fetch to its tile. Outcomes for tiles that were
    /// evicted in the meantime are discarded.
    pub fn apply_outcome(&mut self, outcome: FetchOutcome, display: &mut dyn TileDisplay) {
        let Some(tile) = self.tiles.get_mut(&outcome.address) else {
            return;
        };
        if tile.state() != TileState::Loading {
            return;
        }

        match outcome.result {
            Ok(bytes) => match tile.update(&bytes, self.observer.as_ref()) {
                Ok(()) => {}
                Err(TileError::CacheCorruption) => {
                    warn!("corrupt tile bytes for {:?}", outcome.address);
                    self.cache.evict(&self.partition, outcome.address);
                    tile.resolve_error(self.observer.as_ref());
                }
                Err(err) => {
                    warn!("tile {:?} failed: {}", outcome.address, err);
                    tile.resolve_error(self.observer.as_ref());
                }
            },
            Err(TileError::TileNotFound(_)) => tile.resolve_missing(self.observer.as_ref()),
            Err(err) => {
                warn!("tile {:?} fetch failed: {}", outcome.address, err);
                tile.resolve_error(self.observer.as_ref());
            }
        }

        if let Some(surface) = tile.content() {
            display.show_tile(outcome.address, surface, tile.screen_location().clone());
        }
    }

    /// Evicts every tile whose address is outside `rect`, cancelling any
    /// in-flight loads.
    pub fn remove_tiles_outside_of(&mut self, rect: &TileRect, display: &mut dyn TileDisplay) {
        let outside: Vec<TileAddress> = self
            .tiles
            .keys()
            .filter(|addr| !rect.contains(addr))
            .copied()
            .collect();

        for addr in outside {
            if let Some(mut tile) = self.tiles.remove(&addr) {
                tile.destroy(self.observer.as_ref());
                display.remove_tile(addr);
            }
        }
    }

    /// Cancels and removes all tiles unconditionally
    pub fn reset_tiles(&mut self, display: &mut dyn TileDisplay) {
        let all: Vec<TileAddress> = self.tiles.keys().copied().collect();
        for addr in all {
            if let Some(mut tile) = self.tiles.remove(&addr) {
                tile.destroy(self.observer.as_ref());
                display.remove_tile(addr);
            }
        }
    }

    fn submit_fetch(&self, tile: &TileImage) {
        self.fetch.submit(FetchJob {
            address: tile.address(),
            partition: self.partition.clone(),
            source: self.source.clone(),
            cache: self.cache.clone(),
            token: tile.cancel_token(),
        });
    }
}
