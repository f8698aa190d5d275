//! End-to-end pipeline tests: viewport updates through the loader, worker
//! pool, cache tiers and display seam.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tilescroll::prelude::*;
use tilescroll::tiles::RecordingObserver;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Display that records every show/remove call
#[derive(Default)]
struct RecordingDisplay {
    shown: Vec<(TileAddress, Bounds)>,
    removed: Vec<TileAddress>,
}

impl TileDisplay for RecordingDisplay {
    fn show_tile(&mut self, addr: TileAddress, _surface: tilescroll::tiles::TileSurface, placement: Bounds) {
        self.shown.push((addr, placement));
    }

    fn remove_tile(&mut self, addr: TileAddress) {
        self.removed.push(addr);
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 120, 40, 255]));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageOutputFormat::Png,
    )
    .unwrap();
    bytes
}

/// Source serving one PNG for every address, counting fetches
struct PngSource {
    fetches: AtomicUsize,
    bytes: Vec<u8>,
}

impl PngSource {
    fn new() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            bytes: png_bytes(),
        }
    }
}

impl MapSource for PngSource {
    fn fetch_tile_bytes(&self, _addr: TileAddress) -> tilescroll::Result<Vec<u8>> {
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
        "png"
    }
}

/// Source with no data anywhere
struct EmptySource;

impl MapSource for EmptySource {
    fn fetch_tile_bytes(&self, addr: TileAddress) -> tilescroll::Result<Vec<u8>> {
        Err(TileError::TileNotFound(addr))
    }

    fn zoom_range(&self) -> RangeInclusive<u8> {
        0..=18
    }

    fn tile_side_length(&self) -> u32 {
        256
    }

    fn cache_partition_key(&self) -> &str {
        "empty"
    }
}

/// Source whose fetches block until the test releases them, so cancellation
/// can be interleaved with an in-flight download.
struct GatedSource {
    bytes: Vec<u8>,
    started: AtomicUsize,
    completed: AtomicUsize,
    gate: Mutex<Receiver<()>>,
}

impl GatedSource {
    fn new() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(Self {
                bytes: png_bytes(),
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                gate: Mutex::new(rx),
            }),
            tx,
        )
    }
}

impl MapSource for GatedSource {
    fn fetch_tile_bytes(&self, _addr: TileAddress) -> tilescroll::Result<Vec<u8>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .gate
            .lock()
            .map_err(|_| TileError::FetchFailed("gate poisoned".into()))?
            .clone();
        gate.recv()
            .map_err(|_| TileError::FetchFailed("gate closed".into()))?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(self.bytes.clone())
    }

    fn zoom_range(&self) -> RangeInclusive<u8> {
        0..=18
    }

    fn tile_side_length(&self) -> u32 {
        256
    }

    fn cache_partition_key(&self) -> &str {
        "gated"
    }
}

/// 512x512 screen centered on (0,0) at the exact scale of `zoom`, which the
/// projection covers with a 3x3 tile rect.
fn viewport_at(loader: &TileLoader, zoom: u8) -> Viewport {
    let screen = Bounds::from_coords(0.0, 0.0, 512.0, 512.0);
    let mpp = loader.projection().meters_per_pixel_at(zoom);
    Viewport::centered_on(LatLng::new(0.0, 0.0), mpp, screen)
}

fn pump_until(
    loader: &mut TileLoader,
    display: &mut RecordingDisplay,
    mut done: impl FnMut(&TileLoader, &RecordingDisplay) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(loader, display) {
        assert!(Instant::now() < deadline, "pipeline did not settle in time");
        loader.pump_blocking(Duration::from_millis(50), display);
    }
}

#[test]
fn test_nine_tile_placement() {
    init_logging();
    let source = Arc::new(PngSource::new());
    let observer = Arc::new(RecordingObserver::new());
    let mut loader = TileLoader::new(
        source.clone(),
        Arc::new(TileCache::default()),
        observer.clone(),
        FetchPoolConfig::default(),
    );
    let mut display = RecordingDisplay::default();

    let vp = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp, &mut display);

    assert_eq!(observer.count_requested(), 9);
    assert_eq!(loader.tile_set().len(), 9);
    assert_eq!(loader.loaded_tiles().tile_count(), 9);
    assert!(loader.is_screen_covered(&vp));

    pump_until(&mut loader, &mut display, |_, d| d.shown.len() >= 9);
    assert_eq!(observer.count_loaded(), 9);

    // Tiles form a uniform 3x3 grid of 256px squares covering the screen.
    let mut union = Bounds::empty();
    let mut origins = HashSet::default();
    for (addr, placement) in &display.shown {
        assert!((placement.width() - 256.0).abs() < 1e-6);
        assert!((placement.height() - 256.0).abs() < 1e-6);
        assert!(origins.insert((*addr, placement.min.x as i64, placement.min.y as i64)));
        union.extend_bounds(placement);
    }
    assert_eq!(origins.len(), 9);
    assert!(union.contains_bounds(&vp.screen_bounds));
}

#[test]
fn test_pan_within_coverage_is_free() {
    init_logging();
    let source = Arc::new(PngSource::new());
    let observer = Arc::new(RecordingObserver::new());
    let mut loader = TileLoader::new(
        source.clone(),
        Arc::new(TileCache::default()),
        observer.clone(),
        FetchPoolConfig::default(),
    );
    let mut display = RecordingDisplay::default();

    let vp = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp, &mut display);
    pump_until(&mut loader, &mut display, |l, _| {
        l.tile_set().len() == 9 && display_settled(&observer, 9)
    });

    let fetches_before = source.fetches.load(Ordering::SeqCst);
    let requested_before = observer.count_requested();

    // Drag the content 100px left: the world origin moves 100px worth of
    // meters east, and the loaded coverage shifts left with the content.
    let delta = Point::new(-100.0, 0.0);
    let panned = Viewport::new(
        vp.screen_bounds.clone(),
        Point::new(
            vp.world_origin.x + 100.0 * vp.meters_per_pixel,
            vp.world_origin.y,
        ),
        vp.meters_per_pixel,
    );
    loader.move_by(delta, &panned, &mut display);

    assert!(loader.is_screen_covered(&panned));
    assert_eq!(observer.count_requested(), requested_before);
    assert_eq!(source.fetches.load(Ordering::SeqCst), fetches_before);
}

fn display_settled(observer: &RecordingObserver, loaded: usize) -> bool {
    observer.count_loaded() >= loaded
}

#[test]
fn test_zoom_within_level_is_free() {
    init_logging();
    let source = Arc::new(PngSource::new());
    let observer = Arc::new(RecordingObserver::new());
    let mut loader = TileLoader::new(
        source.clone(),
        Arc::new(TileCache::default()),
        observer.clone(),
        FetchPoolConfig::default(),
    );
    let mut display = RecordingDisplay::default();

    let vp = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp, &mut display);
    let requested_before = observer.count_requested();

    // Magnify 5% about the screen center; the scale still rounds to the same
    // zoom level and the enlarged coverage still contains the screen.
    let factor = 1.05;
    let zoomed = Viewport::centered_on(
        LatLng::new(0.0, 0.0),
        vp.meters_per_pixel / factor,
        vp.screen_bounds.clone(),
    );
    loader.zoom_by_factor(factor, vp.screen_bounds.center(), &zoomed, &mut display);

    assert_eq!(observer.count_requested(), requested_before);
}

#[test]
fn test_zoom_level_change_resets_tiles() {
    init_logging();
    let source = Arc::new(PngSource::new());
    let observer = Arc::new(RecordingObserver::new());
    let mut loader = TileLoader::new(
        source,
        Arc::new(TileCache::default()),
        observer.clone(),
        FetchPoolConfig::default(),
    );
    let mut display = RecordingDisplay::default();

    let vp10 = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp10, &mut display);
    assert_eq!(loader.loaded_zoom(), 10);

    let vp11 = viewport_at(&loader, 11);
    loader.on_viewport_changed(&vp11, &mut display);

    assert_eq!(loader.loaded_zoom(), 11);
    // All nine zoom-10 tiles were destroyed and nine zoom-11 tiles requested.
    assert_eq!(observer.count_removed(), 9);
    assert_eq!(observer.count_requested(), 18);
    assert!(loader
        .tile_set()
        .contains(&loader.loaded_tiles().origin));
    assert_eq!(loader.loaded_tiles().origin.zoom, 11);
}

#[test]
fn test_missing_tiles_resolve_with_placeholder() {
    init_logging();
    let observer = Arc::new(RecordingObserver::new());
    let mut loader = TileLoader::new(
        Arc::new(EmptySource),
        Arc::new(TileCache::default()),
        observer.clone(),
        FetchPoolConfig::default(),
    );
    let mut display = RecordingDisplay::default();

    let vp = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp, &mut display);

    pump_until(&mut loader, &mut display, |_, d| d.shown.len() >= 9);

    // Every tile resolved and was displayed, none is stuck Loading.
    assert_eq!(observer.count_loaded(), 9);
    for addr in loader.loaded_tiles().iter() {
        assert_eq!(
            loader.tile_set().state_of(&addr),
            Some(TileState::Loaded)
        );
    }
}

#[test]
fn test_pan_away_cancels_and_discards_late_bytes() {
    init_logging();
    let (source, gate) = GatedSource::new();
    let observer = Arc::new(RecordingObserver::new());
    let store = Arc::new(TileStore::open_in_memory().unwrap());

    let mut loader = TileLoader::new(
        source.clone(),
        Arc::new(TileCache::default()),
        observer.clone(),
        FetchPoolConfig { workers: 1 },
    );
    loader.attach_offline_store(store.clone());
    let mut display = RecordingDisplay::default();

    let vp = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp, &mut display);
    let first_rect = *loader.loaded_tiles();
    assert_eq!(observer.count_requested(), 9);

    // Wait for the single worker to be inside a fetch.
    let deadline = Instant::now() + Duration::from_secs(10);
    while source.started.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "worker never started fetching");
        std::thread::sleep(Duration::from_millis(5));
    }

    // Pan to the other side of the planet: a disjoint rect, so all nine
    // tiles are evicted while one download is mid-flight.
    let far = Viewport::centered_on(
        LatLng::new(-33.86, 151.21),
        vp.meters_per_pixel,
        vp.screen_bounds.clone(),
    );
    loader.on_viewport_changed(&far, &mut display);

    assert_eq!(observer.count_cancelled(), 9);
    assert_eq!(observer.count_removed(), 9);
    for (addr, _) in &display.shown {
        assert!(!first_rect.contains(addr));
    }

    // Release every fetch. The in-flight download finishes after its tile
    // was cancelled; its bytes must never reach the display.
    for _ in 0..32 {
        let _ = gate.send(());
    }
    pump_until(&mut loader, &mut display, |_, _| {
        observer.count_loaded() >= 9
    });

    for (addr, _) in &display.shown {
        assert!(
            !first_rect.contains(addr),
            "late bytes for evicted tile {:?} were displayed",
            addr
        );
    }

    // The completed download still landed in the persistent tier.
    let survived = first_rect
        .iter()
        .any(|addr| matches!(store.read_tile(addr.key()), Ok(Some(_))));
    assert!(survived, "cancelled download was not persisted");
}

#[test]
fn test_second_visit_served_from_persistent_tier() {
    init_logging();
    let observer = Arc::new(RecordingObserver::new());
    let store = Arc::new(TileStore::open_in_memory().unwrap());

    let source = Arc::new(PngSource::new());
    {
        let mut loader = TileLoader::new(
            source.clone(),
            Arc::new(TileCache::default()),
            observer.clone(),
            FetchPoolConfig::default(),
        );
        loader.attach_offline_store(store.clone());
        let mut display = RecordingDisplay::default();
        let vp = viewport_at(&loader, 10);
        loader.on_viewport_changed(&vp, &mut display);
        pump_until(&mut loader, &mut display, |_, _| {
            observer.count_loaded() >= 9
        });
    }
    assert_eq!(source.fetches.load(Ordering::SeqCst), 9);
    assert_eq!(store.tile_count().unwrap(), 9);

    // Fresh session over the same store: everything is a persistent hit.
    let source2 = Arc::new(PngSource::new());
    let observer2 = Arc::new(RecordingObserver::new());
    let mut loader = TileLoader::new(
        source2.clone(),
        Arc::new(TileCache::default()),
        observer2.clone(),
        FetchPoolConfig::default(),
    );
    loader.attach_offline_store(store);
    let mut display = RecordingDisplay::default();
    let vp = viewport_at(&loader, 10);
    loader.on_viewport_changed(&vp, &mut display);
    pump_until(&mut loader, &mut display, |_, _| {
        observer2.count_loaded() >= 9
    });

    assert_eq!(source2.fetches.load(Ordering::SeqCst), 0);
}
