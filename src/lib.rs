//! # Tilescroll
//!
//! A viewport-driven raster tile streaming engine.
//!
//! Map imagery is organized as a quad-tree tile pyramid; this crate decides
//! which tiles a scrolling/zooming viewport needs, fetches them through a
//! tiered cache (bounded in-memory tier over a persistent sqlite tile store),
//! and evicts tiles that leave the viewport. Rendering, gesture handling and
//! the network transport are external collaborators reached through small
//! trait seams.

pub mod cache;
pub mod core;
pub mod render;
pub mod source;
pub mod tiles;

pub mod prelude;

// Re-export public API
pub use crate::core::{
    bounds::Bounds,
    geo::{LatLng, LatLngBounds, Point},
    projection::{Projection, TileAddress, TileKey, TileRect},
    viewport::Viewport,
};

pub use crate::cache::{MemoryCacheConfig, TileCache};
pub use crate::source::{Attribution, FileMapSource, HttpMapSource, MapSource};
pub use crate::tiles::{
    events::{TileEvent, TileObserver},
    image::{TileImage, TileState},
    loader::{FetchPool, FetchPoolConfig, TileLoader},
    set::TileSet,
};

pub use crate::render::TileDisplay;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, TileError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("zoom {requested} outside supported range {min}..={max}")]
    ProjectionOutOfRange { requested: u8, min: u8, max: u8 },

    #[error("no tile data for {0:?}")]
    TileNotFound(core::projection::TileAddress),

    #[error("tile fetch failed: {0}")]
    FetchFailed(String),

    #[error("tile store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("cached tile bytes failed to decode")]
    CacheCorruption,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
}

/// Error type alias for convenience
pub type Error = TileError;
