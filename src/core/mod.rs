pub mod bounds;
pub mod geo;
pub mod projection;
pub mod viewport;

pub use bounds::Bounds;
pub use geo::{LatLng, LatLngBounds, Point};
pub use projection::{Projection, TileAddress, TileKey, TileRect};
pub use viewport::Viewport;
