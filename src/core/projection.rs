//! Tile-pyramid addressing and viewport-to-tile projection math.
//!
//! Everything in this module is pure and deterministic: cache correctness
//! depends on identical inputs always producing identical tile addresses and
//! keys.

use crate::core::bounds::Bounds;
use crate::core::geo::{Point, WORLD_SIZE};
use crate::core::viewport::Viewport;
use crate::{Result, TileError};
use serde::{Deserialize, Serialize};

/// Deepest zoom level the key encoding supports.
pub const MAX_TILE_ZOOM: u8 = 30;

/// A 64-bit key deterministically derived from a tile address.
///
/// The encoding is the quad-tree linear index: all tiles of levels above
/// `zoom` come first, then the row-major index within the level. This is
/// injective for every valid address up to [`MAX_TILE_ZOOM`] and is used as
/// the persistent-store primary key.
pub type TileKey = u64;

/// Number of tiles in all pyramid levels strictly above `zoom`,
/// i.e. `(4^zoom - 1) / 3`.
fn level_offset(zoom: u8) -> u64 {
    ((1u64 << (2 * zoom as u32)) - 1) / 3
}

/// A node in the quad-tree tile pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileAddress {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileAddress {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// The distinguished "no tiles loaded yet" address
    pub fn dummy() -> Self {
        Self {
            x: u32::MAX,
            y: u32::MAX,
            zoom: u8::MAX,
        }
    }

    pub fn is_dummy(&self) -> bool {
        *self == Self::dummy()
    }

    /// Checks that the address lies inside the pyramid at its zoom level
    pub fn is_valid(&self) -> bool {
        self.zoom <= MAX_TILE_ZOOM && {
            let n = 1u64 << self.zoom;
            (self.x as u64) < n && (self.y as u64) < n
        }
    }

    /// Encodes the address as its persistent-store key.
    ///
    /// The address must be valid; normalize first for raw pan/zoom output.
    pub fn key(&self) -> TileKey {
        debug_assert!(self.is_valid());
        level_offset(self.zoom) + ((self.y as u64) << self.zoom) + self.x as u64
    }

    /// Decodes a key back into an address. Returns `None` for keys past the
    /// last level-30 tile.
    pub fn from_key(key: TileKey) -> Option<Self> {
        for zoom in 0..=MAX_TILE_ZOOM {
            if key < level_offset(zoom + 1) {
                let rem = key - level_offset(zoom);
                let n_mask = (1u64 << zoom) - 1;
                return Some(Self {
                    x: (rem & n_mask) as u32,
                    y: (rem >> zoom) as u32,
                    zoom,
                });
            }
        }
        None
    }
}

/// The rectangle of tiles required to cover a viewport at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub origin: TileAddress,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn new(origin: TileAddress, width: u32, height: u32) -> Self {
        Self {
            origin,
            width,
            height,
        }
    }

    /// The "nothing loaded" rect used as the loader's initial state
    pub fn dummy() -> Self {
        Self::new(TileAddress::dummy(), 0, 0)
    }

    pub fn is_dummy(&self) -> bool {
        self.origin.is_dummy()
    }

    pub fn tile_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the rect contains an address. X distance is taken modulo the
    /// level width, so rects spanning the antimeridian behave correctly.
    pub fn contains(&self, addr: &TileAddress) -> bool {
        if self.is_dummy() || addr.zoom != self.origin.zoom {
            return false;
        }
        let n = 1u64 << self.origin.zoom;
        let dx = (addr.x as u64 + n - self.origin.x as u64) % n;
        dx < self.width as u64 && addr.y >= self.origin.y && addr.y < self.origin.y + self.height
    }

    /// Iterates the rect's addresses row-major from the origin, wrapping x
    /// around the level width.
    pub fn iter(&self) -> impl Iterator<Item = TileAddress> + '_ {
        let n = 1u64 << self.origin.zoom.min(MAX_TILE_ZOOM);
        let origin = self.origin;
        let width = self.width;
        (0..self.height).flat_map(move |row| {
            (0..width).map(move |col| {
                TileAddress::new(
                    ((origin.x as u64 + col as u64) % n) as u32,
                    origin.y + row,
                    origin.zoom,
                )
            })
        })
    }

    /// Offset of `addr` within the rect in (columns, rows), if contained
    pub fn offset_of(&self, addr: &TileAddress) -> Option<(u32, u32)> {
        if !self.contains(addr) {
            return None;
        }
        let n = 1u64 << self.origin.zoom;
        let dx = (addr.x as u64 + n - self.origin.x as u64) % n;
        Some((dx as u32, addr.y - self.origin.y))
    }
}

/// Maps a continuous geographic viewport to discrete tile coordinates for one
/// tile source (its tile side length and supported zoom range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    tile_side: u32,
    min_zoom: u8,
    max_zoom: u8,
}

impl Projection {
    pub fn new(tile_side: u32, min_zoom: u8, max_zoom: u8) -> Self {
        Self {
            tile_side,
            min_zoom,
            max_zoom: max_zoom.min(MAX_TILE_ZOOM),
        }
    }

    pub fn tile_side(&self) -> u32 {
        self.tile_side
    }

    pub fn zoom_range(&self) -> std::ops::RangeInclusive<u8> {
        self.min_zoom..=self.max_zoom
    }

    /// Ground meters covered by one tile side at `zoom`
    pub fn tile_meters(&self, zoom: u8) -> f64 {
        WORLD_SIZE / (1u64 << zoom) as f64
    }

    /// Map scale at which tiles of `zoom` render 1:1
    pub fn meters_per_pixel_at(&self, zoom: u8) -> f64 {
        self.tile_meters(zoom) / self.tile_side as f64
    }

    /// Maps a continuous scale to the nearest supported discrete zoom level.
    /// Out-of-range scales produce `ProjectionOutOfRange`; the caller clamps.
    pub fn checked_zoom_for_scale(&self, meters_per_pixel: f64) -> Result<u8> {
        let raw = (WORLD_SIZE / (self.tile_side as f64 * meters_per_pixel)).log2();
        let rounded = raw.round();
        if !rounded.is_finite() || rounded < self.min_zoom as f64 || rounded > self.max_zoom as f64 {
            let requested = rounded.clamp(0.0, u8::MAX as f64) as u8;
            return Err(TileError::ProjectionOutOfRange {
                requested,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        Ok(rounded as u8)
    }

    /// Like [`Projection::checked_zoom_for_scale`] but clamps to the
    /// supported range, logging the excursion. Never fatal.
    pub fn zoom_for_scale(&self, meters_per_pixel: f64) -> u8 {
        match self.checked_zoom_for_scale(meters_per_pixel) {
            Ok(zoom) => zoom,
            Err(err) => {
                log::warn!("clamping zoom: {}", err);
                let raw = (WORLD_SIZE / (self.tile_side as f64 * meters_per_pixel)).log2();
                if raw.is_nan() || raw < self.min_zoom as f64 {
                    self.min_zoom
                } else {
                    self.max_zoom
                }
            }
        }
    }

    /// Wraps x modulo the level width (antimeridian) and clamps y into the
    /// level
    pub fn normalize(&self, addr: TileAddress) -> TileAddress {
        let n = 1u64 << addr.zoom.min(MAX_TILE_ZOOM);
        TileAddress::new(
            (addr.x as u64 % n) as u32,
            addr.y.min((n - 1) as u32),
            addr.zoom.min(MAX_TILE_ZOOM),
        )
    }

    /// Computes the minimal tile rectangle covering the viewport's screen
    /// rectangle at `zoom`, with one tile of margin so sub-pixel scrolls
    /// never expose a gap.
    pub fn tile_rect_for_viewport(&self, viewport: &Viewport, zoom: u8) -> TileRect {
        let side_m = self.tile_meters(zoom);
        let n = 1i64 << zoom;

        let origin_col = (viewport.world_origin.x / side_m).floor() as i64;
        let origin_row = (viewport.world_origin.y / side_m).floor() as i64;

        let span_x = viewport.screen_bounds.width() * viewport.meters_per_pixel;
        let span_y = viewport.screen_bounds.height() * viewport.meters_per_pixel;
        let mut width = (span_x / side_m).ceil() as i64 + 1;
        let mut height = (span_y / side_m).ceil() as i64 + 1;

        // Wrap columns, clamp rows into the pyramid.
        width = width.min(n);
        let row = origin_row.clamp(0, n - 1);
        height = height.min(n - row);
        let col = origin_col.rem_euclid(n);

        TileRect::new(
            TileAddress::new(col as u32, row as u32, zoom),
            width as u32,
            height as u32,
        )
    }

    /// World-meter footprint of a tile rect under the given viewport.
    ///
    /// Anchored at the unwrapped tile column/row containing the viewport
    /// origin so the footprint stays continuous across the antimeridian.
    pub fn world_bounds_for_rect(&self, viewport: &Viewport, rect: &TileRect) -> Bounds {
        let side_m = self.tile_meters(rect.origin.zoom);
        let start = Point::new(
            (viewport.world_origin.x / side_m).floor() * side_m,
            (viewport.world_origin.y / side_m).floor().max(0.0) * side_m,
        );
        Bounds::from_origin_and_size(
            start,
            rect.width as f64 * side_m,
            rect.height as f64 * side_m,
        )
    }

    /// Screen-space footprint of a tile rect under the given viewport. The
    /// rect must have been produced by [`Projection::tile_rect_for_viewport`]
    /// for the same viewport; the result tiles uniformly with no overlap.
    pub fn screen_bounds_for_rect(&self, viewport: &Viewport, rect: &TileRect) -> Bounds {
        let world = self.world_bounds_for_rect(viewport, rect);
        Bounds::from_origin_and_size(
            viewport.world_to_screen(world.min),
            world.width() / viewport.meters_per_pixel,
            world.height() / viewport.meters_per_pixel,
        )
    }
}
