//! Fetch worker pool and the viewport-driven load orchestrator.

use crate::cache::{TileCache, TileStore};
use crate::core::bounds::Bounds;
use crate::core::geo::Point;
use crate::core::projection::{Projection, TileAddress, TileRect};
use crate::core::viewport::Viewport;
use crate::render::TileDisplay;
use crate::source::MapSource;
use crate::tiles::events::SharedObserver;
use crate::tiles::image::CancelToken;
use crate::tiles::set::TileSet;
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchPoolConfig {
    /// Number of worker threads fetching tiles concurrently
    pub workers: usize,
}

impl Default for FetchPoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// One tile fetch: everything a worker needs to resolve the tile through the
/// cache and, on a miss, the source.
pub struct FetchJob {
    pub(crate) address: TileAddress,
    pub(crate) partition: Arc<str>,
    pub(crate) source: Arc<dyn MapSource>,
    pub(crate) cache: Arc<TileCache>,
    pub(crate) token: CancelToken,
}

/// A finished fetch, delivered back to the interactive thread
pub struct FetchOutcome {
    pub address: TileAddress,
    pub result: Result<Arc<Vec<u8>>>,
}

/// Cloneable submission side of the pool
#[derive(Clone)]
pub struct FetchHandle {
    job_tx: Sender<FetchJob>,
}

impl FetchHandle {
    pub(crate) fn submit(&self, job: FetchJob) {
        // Send only fails once the pool is gone; the tile then stays Loading
        // until evicted, which is the same as a fetch that never returns.
        let _ = self.job_tx.send(job);
    }
}

/// Pool of blocking fetch workers.
///
/// Workers consult the persistent cache tier first, then the source.
/// Outcomes queue up until the interactive thread drains them; a job whose
/// token was cancelled produces no outcome, though bytes that were already
/// fetched still land in the persistent tier for a later visit.
pub struct FetchPool {
    handle: FetchHandle,
    outcome_rx: Receiver<FetchOutcome>,
}

impl FetchPool {
    pub fn new(config: FetchPoolConfig) -> Self {
        let (job_tx, job_rx) = unbounded::<FetchJob>();
        let (outcome_tx, outcome_rx) = unbounded::<FetchOutcome>();

        for id in 0..config.workers.max(1) {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            thread::Builder::new()
                .name(format!("tile-fetch-{}", id))
                .spawn(move || {
                    for job in job_rx.iter() {
                        if let Some(outcome) = run_job(&job) {
                            if outcome_tx.send(outcome).is_err() {
                                break;
                            }
                        }
                    }
                })
                .expect("failed to spawn fetch worker");
        }

        Self {
            handle: FetchHandle { job_tx },
            outcome_rx,
        }
    }

    pub fn handle(&self) -> FetchHandle {
        self.handle.clone()
    }

    /// Non-blocking drain step for the interactive thread
    pub fn try_recv(&self) -> Option<FetchOutcome> {
        self.outcome_rx.try_recv().ok()
    }

    /// Blocking receive with a deadline. Intended for tests and headless
    /// batch use.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchOutcome> {
        self.outcome_rx.recv_timeout(timeout).ok()
    }
}

fn run_job(job: &FetchJob) -> Option<FetchOutcome> {
    if job.token.is_cancelled() {
        return None;
    }

    // Persistent tier first; a hit also promotes into the memory tier.
    if let Some(bytes) = job.cache.fetch(&job.partition, job.address) {
        if job.token.is_cancelled() {
            return None;
        }
        return Some(FetchOutcome {
            address: job.address,
            result: Ok(bytes),
        });
    }

    match job.source.fetch_tile_bytes(job.address) {
        Ok(bytes) => {
            let bytes = Arc::new(bytes);
            if job.token.is_cancelled() {
                // The download completed anyway; keep it for a later visit
                // without publishing to the memory tier.
                job.cache
                    .store_persistent_only(&job.partition, job.address, &bytes);
                None
            } else {
                job.cache.store(&job.partition, job.address, bytes.clone());
                Some(FetchOutcome {
                    address: job.address,
                    result: Ok(bytes),
                })
            }
        }
        Err(err) => {
            if job.token.is_cancelled() {
                None
            } else {
                Some(FetchOutcome {
                    address: job.address,
                    result: Err(err),
                })
            }
        }
    }
}

/// Orchestrates tile loading against a moving viewport.
///
/// Owned by the interactive thread. Every public operation is synchronous;
/// fetches land asynchronously and are applied by [`TileLoader::pump`].
///
/// The loader tracks what it last achieved (`loaded_bounds`, `loaded_zoom`,
/// `loaded_tiles`) so that pans and zooms which stay within already-loaded
/// coverage skip tile math entirely.
pub struct TileLoader {
    projection: Projection,
    tile_set: TileSet,
    pool: FetchPool,
    loaded_bounds: Bounds,
    loaded_world: Bounds,
    loaded_zoom: u8,
    loaded_tiles: TileRect,
    suppress_loading: bool,
}

impl TileLoader {
    pub fn new(
        source: Arc<dyn MapSource>,
        cache: Arc<TileCache>,
        observer: SharedObserver,
        pool_config: FetchPoolConfig,
    ) -> Self {
        let projection = Projection::new(
            source.tile_side_length(),
            *source.zoom_range().start(),
            *source.zoom_range().end(),
        );
        let pool = FetchPool::new(pool_config);
        let tile_set = TileSet::new(source, cache, pool.handle(), observer);

        Self {
            projection,
            tile_set,
            pool,
            loaded_bounds: Bounds::default(),
            loaded_world: Bounds::default(),
            loaded_zoom: 0,
            loaded_tiles: TileRect::dummy(),
            suppress_loading: false,
        }
    }

    /// Attaches a writable persistent cache store for this loader's source,
    /// so fetched tiles survive across sessions. Ignored for sources that
    /// already are a local store.
    pub fn attach_offline_store(&self, store: Arc<TileStore>) {
        self.tile_set.attach_offline_store(store);
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn tile_set(&self) -> &TileSet {
        &self.tile_set
    }

    pub fn loaded_zoom(&self) -> u8 {
        self.loaded_zoom
    }

    pub fn loaded_bounds(&self) -> &Bounds {
        &self.loaded_bounds
    }

    pub fn loaded_tiles(&self) -> &TileRect {
        &self.loaded_tiles
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppress_loading
    }

    /// Whether the screen is already fully covered by loaded tiles at the
    /// zoom level the viewport's scale maps to. When true, a viewport update
    /// is a no-op.
    ///
    /// Coverage is checked in both screen space (kept current by the pan and
    /// zoom fast paths) and world space, so a viewport whose origin jumped
    /// to an unloaded region is never reported as covered.
    pub fn is_screen_covered(&self, viewport: &Viewport) -> bool {
        !self.loaded_tiles.is_dummy()
            && self.loaded_zoom == self.projection.zoom_for_scale(viewport.meters_per_pixel)
            && self.loaded_bounds.contains_bounds(&viewport.screen_bounds)
            && self.loaded_world.contains_bounds(&world_extent(viewport))
    }

    /// Recomputes the required tile rect for the viewport, requests tiles
    /// not yet present and evicts tiles that fell outside.
    pub fn on_viewport_changed(&mut self, viewport: &Viewport, display: &mut dyn TileDisplay) {
        if self.suppress_loading || !viewport.is_renderable() || self.is_screen_covered(viewport) {
            return;
        }

        let zoom = self.projection.zoom_for_scale(viewport.meters_per_pixel);
        if !self.loaded_tiles.is_dummy() && zoom != self.tile_set.zoom() {
            // Tiles of another zoom level are never reused.
            debug!("zoom level {} -> {}, resetting tiles", self.tile_set.zoom(), zoom);
            self.tile_set.reset_tiles(display);
        }
        self.tile_set.set_zoom(zoom);

        let target = self.projection.tile_rect_for_viewport(viewport, zoom);
        let display_bounds = self.projection.screen_bounds_for_rect(viewport, &target);
        let achieved = self.tile_set.load_tiles(&target, &display_bounds, display);
        self.tile_set.remove_tiles_outside_of(&target, display);

        self.loaded_tiles = target;
        self.loaded_zoom = zoom;
        self.loaded_bounds = achieved;
        self.loaded_world = self.projection.world_bounds_for_rect(viewport, &target);
    }

    /// Pan fast path: the loaded coverage moves with the content, so a pan
    /// that keeps the screen inside it issues zero fetches.
    pub fn move_by(&mut self, delta: Point, viewport: &Viewport, display: &mut dyn TileDisplay) {
        if !self.loaded_tiles.is_dummy() {
            self.loaded_bounds = self.loaded_bounds.translated(delta);
        }
        self.on_viewport_changed(viewport, display);
    }

    /// Zoom fast path: scales the loaded coverage about the gesture pivot.
    /// A zoom that stays within the same discrete level and keeps the screen
    /// covered issues zero fetches.
    pub fn zoom_by_factor(
        &mut self,
        factor: f64,
        pivot: Point,
        viewport: &Viewport,
        display: &mut dyn TileDisplay,
    ) {
        if !self.loaded_tiles.is_dummy() {
            self.loaded_bounds = self.loaded_bounds.scaled_about(factor, pivot);
        }
        self.on_viewport_changed(viewport, display);
    }

    /// Suspends or resumes loading. Resuming runs an immediate catch-up
    /// update for the current viewport.
    pub fn set_suppress_loading(
        &mut self,
        suppress: bool,
        viewport: &Viewport,
        display: &mut dyn TileDisplay,
    ) {
        if self.suppress_loading == suppress {
            return;
        }
        self.suppress_loading = suppress;
        if !suppress {
            self.on_viewport_changed(viewport, display);
        }
    }

    /// Applies every fetch outcome queued so far. Returns how many were
    /// applied. Call once per frame or after user input.
    pub fn pump(&mut self, display: &mut dyn TileDisplay) -> usize {
        let mut applied = 0;
        while let Some(outcome) = self.pool.try_recv() {
            self.tile_set.apply_outcome(outcome, display);
            applied += 1;
        }
        applied
    }

    /// Like [`TileLoader::pump`] but waits up to `timeout` for at least one
    /// outcome. Intended for tests and headless batch use.
    pub fn pump_blocking(&mut self, timeout: Duration, display: &mut dyn TileDisplay) -> usize {
        match self.pool.recv_timeout(timeout) {
            Some(outcome) => {
                self.tile_set.apply_outcome(outcome, display);
                1 + self.pump(display)
            }
            None => 0,
        }
    }

    /// Drops all tiles and forgets the loaded coverage
    pub fn reset(&mut self, display: &mut dyn TileDisplay) {
        self.tile_set.reset_tiles(display);
        self.loaded_bounds = Bounds::default();
        self.loaded_world = Bounds::default();
        self.loaded_zoom = 0;
        self.loaded_tiles = TileRect::dummy();
    }
}

/// World-meter rectangle the viewport looks at
fn world_extent(viewport: &Viewport) -> Bounds {
    Bounds::from_origin_and_size(
        viewport.world_origin,
        viewport.screen_bounds.width() * viewport.meters_per_pixel,
        viewport.screen_bounds.height() * viewport.meters_per_pixel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::NullDisplay;
    use crate::source::Attribution;
    use crate::tiles::events::{NullObserver, RecordingObserver};
    use crate::TileError;
    use std::ops::RangeInclusive;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source that serves a solid PNG for every address and counts fetches
    struct CountingSource {
        fetches: AtomicUsize,
        bytes: Vec<u8>,
    }

    impl CountingSource {
        fn new() -> Self {
            let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 255, 255]));
            let mut bytes = Vec::new();
            img.write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
            Self {
                fetches: AtomicUsize::new(0),
                bytes,
            }
        }
    }

    impl MapSource for CountingSource {
        fn fetch_tile_bytes(&self, _addr: TileAddress) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }

        fn zoom_range(&self) -> RangeInclusive<u8> {
            0..=18
        }

        fn tile_side_length(&self) -> u32 {
            256
        }

        fn cache_partition_key(&self) -> &str {
            "counting"
        }

        fn attribution(&self) -> Attribution {
            Attribution::default()
        }
    }

    /// Source that always reports a failure
    struct FailingSource;

    impl MapSource for FailingSource {
        fn fetch_tile_bytes(&self, _addr: TileAddress) -> Result<Vec<u8>> {
            Err(TileError::FetchFailed("boom".into()))
        }

        fn zoom_range(&self) -> RangeInclusive<u8> {
            0..=18
        }

        fn tile_side_length(&self) -> u32 {
            256
        }

        fn cache_partition_key(&self) -> &str {
            "failing"
        }
    }

    fn job(source: Arc<dyn MapSource>, cache: Arc<TileCache>, token: CancelToken) -> FetchJob {
        FetchJob {
            address: TileAddress::new(1, 1, 2),
            partition: Arc::from(source.cache_partition_key()),
            source,
            cache,
            token,
        }
    }

    #[test]
    fn test_pool_delivers_outcome() {
        let pool = FetchPool::new(FetchPoolConfig { workers: 1 });
        let source = Arc::new(CountingSource::new());
        let cache = Arc::new(TileCache::default());

        pool.handle()
            .submit(job(source.clone(), cache.clone(), CancelToken::new()));

        let outcome = pool
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should deliver");
        assert_eq!(outcome.address, TileAddress::new(1, 1, 2));
        assert!(outcome.result.is_ok());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // The fetch populated the memory tier.
        assert_eq!(cache.memory_len(), 1);
    }

    #[test]
    fn test_cancelled_job_produces_no_outcome() {
        let pool = FetchPool::new(FetchPoolConfig { workers: 1 });
        let source = Arc::new(CountingSource::new());
        let cache = Arc::new(TileCache::default());

        let token = CancelToken::new();
        token.cancel();
        pool.handle().submit(job(source.clone(), cache, token));

        assert!(pool.recv_timeout(Duration::from_millis(300)).is_none());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pool_serves_cache_hit_without_fetch() {
        let pool = FetchPool::new(FetchPoolConfig { workers: 1 });
        let source = Arc::new(CountingSource::new());
        let cache = Arc::new(TileCache::default());
        let partition: Arc<str> = Arc::from("counting");

        let addr = TileAddress::new(1, 1, 2);
        cache.store(&partition, addr, Arc::new(source.bytes.clone()));

        pool.handle()
            .submit(job(source.clone(), cache, CancelToken::new()));

        let outcome = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pool_reports_fetch_failure() {
        let pool = FetchPool::new(FetchPoolConfig { workers: 1 });
        let cache = Arc::new(TileCache::default());

        pool.handle()
            .submit(job(Arc::new(FailingSource), cache, CancelToken::new()));

        let outcome = pool.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome.result, Err(TileError::FetchFailed(_))));
    }

    #[test]
    fn test_loader_ignores_unrenderable_viewport() {
        let source = Arc::new(CountingSource::new());
        let mut loader = TileLoader::new(
            source.clone(),
            Arc::new(TileCache::default()),
            Arc::new(NullObserver),
            FetchPoolConfig { workers: 1 },
        );
        let mut display = NullDisplay;

        // Zero-sized screen, as before view layout.
        let vp = Viewport::new(Bounds::default(), Point::default(), 10.0);
        loader.on_viewport_changed(&vp, &mut display);

        assert!(loader.tile_set().is_empty());
        assert!(loader.loaded_tiles().is_dummy());
    }

    fn drain(loader: &mut TileLoader, expected: usize) {
        let mut display = NullDisplay;
        let mut applied = 0;
        while applied < expected {
            let n = loader.pump_blocking(Duration::from_secs(5), &mut display);
            assert!(n > 0, "fetch outcomes did not arrive");
            applied += n;
        }
    }

    #[test]
    fn test_teleport_invalidates_coverage() {
        let source = Arc::new(CountingSource::new());
        let observer = Arc::new(RecordingObserver::new());
        let mut loader = TileLoader::new(
            source,
            Arc::new(TileCache::default()),
            observer.clone(),
            FetchPoolConfig { workers: 1 },
        );
        let mut display = NullDisplay;

        let screen = Bounds::from_coords(0.0, 0.0, 512.0, 512.0);
        let mpp = loader.projection().meters_per_pixel_at(10);
        let vp = Viewport::centered_on(crate::LatLng::new(0.0, 0.0), mpp, screen.clone());
        loader.on_viewport_changed(&vp, &mut display);
        assert!(loader.is_screen_covered(&vp));

        // Same screen rectangle and scale, but the world origin jumped to an
        // unloaded region.
        let far = Viewport::centered_on(crate::LatLng::new(-33.86, 151.21), mpp, screen);
        assert!(!loader.is_screen_covered(&far));

        loader.on_viewport_changed(&far, &mut display);
        assert_eq!(observer.count_cancelled(), 9);
        assert_eq!(observer.count_removed(), 9);
        assert!(loader.is_screen_covered(&far));
    }

    #[test]
    fn test_offline_store_attached_for_remote_source() {
        let source = Arc::new(CountingSource::new());
        let mut loader = TileLoader::new(
            source,
            Arc::new(TileCache::default()),
            Arc::new(NullObserver),
            FetchPoolConfig { workers: 1 },
        );
        let offline = Arc::new(TileStore::open_in_memory().unwrap());
        loader.attach_offline_store(offline.clone());

        let screen = Bounds::from_coords(0.0, 0.0, 512.0, 512.0);
        let mpp = loader.projection().meters_per_pixel_at(5);
        let vp = Viewport::centered_on(crate::LatLng::new(0.0, 0.0), mpp, screen);
        let mut display = NullDisplay;
        loader.on_viewport_changed(&vp, &mut display);

        let total = loader.tile_set().len();
        drain(&mut loader, total);
        assert_eq!(offline.tile_count().unwrap() as usize, total);
    }

    #[test]
    fn test_offline_store_ignored_for_store_backed_source() {
        use crate::cache::store::pref;
        use crate::source::FileMapSource;

        let backing = Arc::new(TileStore::open_in_memory().unwrap());
        backing.set_preference(pref::MIN_ZOOM, "0").unwrap();
        backing.set_preference(pref::MAX_ZOOM, "18").unwrap();
        backing.set_preference(pref::TILE_SIDE_LENGTH, "256").unwrap();
        let png = CountingSource::new().bytes;
        backing
            .write_tile(TileAddress::new(0, 0, 0).key(), &png)
            .unwrap();

        let source = Arc::new(FileMapSource::from_store(backing, "fixture").unwrap());
        let mut loader = TileLoader::new(
            source,
            Arc::new(TileCache::default()),
            Arc::new(NullObserver),
            FetchPoolConfig { workers: 1 },
        );
        let offline = Arc::new(TileStore::open_in_memory().unwrap());
        loader.attach_offline_store(offline.clone());

        // The whole world is one tile at zoom 0; it must still resolve from
        // the source's own read-only tier.
        let screen = Bounds::from_coords(0.0, 0.0, 512.0, 512.0);
        let mpp = loader.projection().meters_per_pixel_at(0);
        let vp = Viewport::centered_on(crate::LatLng::new(0.0, 0.0), mpp, screen);
        let mut display = NullDisplay;
        loader.on_viewport_changed(&vp, &mut display);
        assert_eq!(loader.tile_set().len(), 1);

        drain(&mut loader, 1);
        assert_eq!(
            loader.tile_set().state_of(&TileAddress::new(0, 0, 0)),
            Some(crate::tiles::image::TileState::Loaded)
        );
        assert_eq!(offline.tile_count().unwrap(), 0);
    }

    #[test]
    fn test_suppression_defers_then_catches_up() {
        let source = Arc::new(CountingSource::new());
        let mut loader = TileLoader::new(
            source,
            Arc::new(TileCache::default()),
            Arc::new(NullObserver),
            FetchPoolConfig { workers: 1 },
        );
        let mut display = NullDisplay;

        let screen = Bounds::from_coords(0.0, 0.0, 512.0, 512.0);
        let mpp = loader.projection().meters_per_pixel_at(10);
        let vp = Viewport::centered_on(crate::LatLng::new(0.0, 0.0), mpp, screen);

        loader.set_suppress_loading(true, &vp, &mut display);
        loader.on_viewport_changed(&vp, &mut display);
        assert!(loader.tile_set().is_empty());

        // Resuming runs the deferred update.
        loader.set_suppress_loading(false, &vp, &mut display);
        assert!(!loader.tile_set().is_empty());
        assert!(loader.is_screen_covered(&vp));
    }
}
