//! Prelude module for common tilescroll types and traits
//!
//! Re-exports the most commonly used types for easy importing with
//! `use tilescroll::prelude::*;`

pub use crate::core::{
    bounds::Bounds,
    geo::{LatLng, LatLngBounds, Point},
    projection::{Projection, TileAddress, TileKey, TileRect},
    viewport::Viewport,
};

pub use crate::cache::{MemoryCacheConfig, TileCache, TileStore};

pub use crate::source::{Attribution, FileMapSource, HttpMapSource, MapSource};

pub use crate::tiles::{
    events::{SharedObserver, TileEvent, TileObserver},
    image::{TileImage, TileState},
    loader::{FetchPool, FetchPoolConfig, TileLoader},
    set::TileSet,
};

pub use crate::render::TileDisplay;

pub use crate::{Error as TileError, Result};

pub use std::sync::Arc;

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
