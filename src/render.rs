//! Seam between the tile core and the on-screen compositing surface.

use crate::core::bounds::Bounds;
use crate::core::projection::TileAddress;
use crate::tiles::image::TileSurface;

/// Consumer of finished tiles.
///
/// For each tile the core pushes a decoded surface plus its screen-space
/// placement rectangle; an eviction pushes a remove signal. All calls happen
/// on the interactive thread. The collaborator must not retain a surface
/// after the tile's remove signal fires.
pub trait TileDisplay {
    fn show_tile(&mut self, addr: TileAddress, surface: TileSurface, placement: Bounds);
    fn remove_tile(&mut self, addr: TileAddress);
}

/// Display that discards everything. Useful for headless operation and
/// tests.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl TileDisplay for NullDisplay {
    fn show_tile(&mut self, _addr: TileAddress, _surface: TileSurface, _placement: Bounds) {}
    fn remove_tile(&mut self, _addr: TileAddress) {}
}
