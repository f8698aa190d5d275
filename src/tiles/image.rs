//! Single-tile load lifecycle: request, asynchronous fetch, cancellation,
//! decoded-content delivery.

use crate::core::bounds::Bounds;
use crate::core::projection::TileAddress;
use crate::tiles::events::{TileEvent, TileObserver};
use crate::{Result, TileError};
use image::{Rgba, RgbaImage};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decoded tile content handed to the rendering collaborator. Immutable
/// snapshot, shareable across the fetch worker and the interactive thread.
pub type TileSurface = Arc<RgbaImage>;

const PLACEHOLDER_SIDE: u32 = 256;

/// Shared "source has no data here" surface, built once at first use
static MISSING_TILE: Lazy<TileSurface> = Lazy::new(|| {
    Arc::new(RgbaImage::from_pixel(
        PLACEHOLDER_SIDE,
        PLACEHOLDER_SIDE,
        Rgba([224, 224, 224, 255]),
    ))
});

/// Shared "fetch failed" surface
static ERROR_TILE: Lazy<TileSurface> = Lazy::new(|| {
    Arc::new(RgbaImage::from_pixel(
        PLACEHOLDER_SIDE,
        PLACEHOLDER_SIDE,
        Rgba([192, 160, 160, 255]),
    ))
});

pub fn missing_tile_surface() -> TileSurface {
    MISSING_TILE.clone()
}

pub fn error_tile_surface() -> TileSurface {
    ERROR_TILE.clone()
}

/// Load state of one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Created,
    Loading,
    /// Resolved with real decoded content
    Loaded,
    /// An in-flight load was cancelled
    Cancelled,
    /// Resolved with the error placeholder; displayable like `Loaded`
    Failed,
    /// Evicted from its tile set
    Destroyed,
}

/// Cancellation flag shared between a tile and its fetch task. The worker
/// checks it before publishing; the interactive thread sets it synchronously
/// on eviction.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One tile's load state, content and screen placement.
///
/// Owned exclusively by the tile set that created it; all mutation happens on
/// the interactive thread. Equality and hashing are defined purely on the
/// address, so two images for the same address are interchangeable.
#[derive(Debug)]
pub struct TileImage {
    address: TileAddress,
    screen_location: Bounds,
    content: Option<TileSurface>,
    state: TileState,
    token: CancelToken,
}

impl PartialEq for TileImage {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for TileImage {}

impl std::hash::Hash for TileImage {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl TileImage {
    pub fn new(address: TileAddress, screen_location: Bounds) -> Self {
        Self {
            address,
            screen_location,
            content: None,
            state: TileState::Created,
            token: CancelToken::new(),
        }
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn content(&self) -> Option<TileSurface> {
        self.content.clone()
    }

    pub fn screen_location(&self) -> &Bounds {
        &self.screen_location
    }

    pub fn set_screen_location(&mut self, location: Bounds) {
        self.screen_location = location;
    }

    /// Token to hand to the asynchronous fetch task
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Whether the tile has displayable content (real or placeholder)
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, TileState::Loaded | TileState::Failed)
    }

    pub fn mark_loading(&mut self) {
        if self.state == TileState::Created {
            self.state = TileState::Loading;
        }
    }

    /// Applies fetched bytes: decodes them and transitions
    /// `Loading -> Loaded`, emitting the loaded notification.
    ///
    /// A no-op once the tile was cancelled or destroyed, even if the fetch
    /// was already in flight: late-arriving bytes are discarded silently.
    /// Returns `CacheCorruption` when the bytes fail to decode so the caller
    /// can evict the cache entry and fall back to the error placeholder.
    pub fn update(&mut self, bytes: &[u8], observer: &dyn TileObserver) -> Result<()> {
        if self.state != TileState::Loading || self.token.is_cancelled() {
            return Ok(());
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|_| TileError::CacheCorruption)?
            .to_rgba8();

        self.content = Some(Arc::new(decoded));
        self.state = TileState::Loaded;
        observer.on_tile_event(TileEvent::Loaded(self.address));
        Ok(())
    }

    /// Resolves the tile with the "missing tile" placeholder
    pub fn resolve_missing(&mut self, observer: &dyn TileObserver) {
        if self.state != TileState::Loading || self.token.is_cancelled() {
            return;
        }
        self.content = Some(missing_tile_surface());
        self.state = TileState::Loaded;
        observer.on_tile_event(TileEvent::Loaded(self.address));
    }

    /// Resolves the tile with the "error tile" placeholder. The tile is
    /// still displayable so the screen never stalls on a failed fetch.
    pub fn resolve_error(&mut self, observer: &dyn TileObserver) {
        if self.state != TileState::Loading || self.token.is_cancelled() {
            return;
        }
        self.content = Some(error_tile_surface());
        self.state = TileState::Failed;
        observer.on_tile_event(TileEvent::Loaded(self.address));
    }

    /// Cancels an in-flight load. Idempotent: repeated calls keep the state
    /// `Cancelled` and emit exactly one cancellation notification.
    pub fn cancel(&mut self, observer: &dyn TileObserver) {
        if self.state != TileState::Loading {
            return;
        }
        self.token.cancel();
        self.state = TileState::Cancelled;
        observer.on_tile_event(TileEvent::Cancelled(self.address));
    }

    /// Evicts the tile: cancels any in-flight load, releases its content and
    /// emits the removed notification.
    pub fn destroy(&mut self, observer: &dyn TileObserver) {
        self.cancel(observer);
        self.content = None;
        self.state = TileState::Destroyed;
        observer.on_tile_event(TileEvent::Removed(self.address));
    }
}
