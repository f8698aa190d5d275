//! Tile lifecycle: request, asynchronous fetch, cancellation, eviction.

pub mod events;
pub mod image;
pub mod loader;
pub mod set;

pub use events::{NullObserver, RecordingObserver, SharedObserver, TileEvent, TileObserver};
pub use image::{CancelToken, TileImage, TileState, TileSurface};
pub use loader::{FetchOutcome, FetchPool, FetchPoolConfig, TileLoader};
pub use set::TileSet;
