use crate::core::bounds::Bounds;
use crate::core::geo::{LatLng, Point};
use serde::{Deserialize, Serialize};

/// The current view of the map: a screen rectangle, the world position of its
/// top-left corner, and the map scale.
///
/// The viewport is owned by the rendering collaborator; the core reads it and
/// never mutates it. `world_origin` is expressed in projected world meters
/// with the origin at the northwest corner of the world and y growing
/// southward (see [`LatLng::to_world`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// The visible rectangle in screen pixels
    pub screen_bounds: Bounds,
    /// World position of the screen rectangle's top-left corner, in meters
    pub world_origin: Point,
    /// Map scale in ground meters per screen pixel
    pub meters_per_pixel: f64,
}

impl Viewport {
    pub fn new(screen_bounds: Bounds, world_origin: Point, meters_per_pixel: f64) -> Self {
        Self {
            screen_bounds,
            world_origin,
            meters_per_pixel,
        }
    }

    /// Builds a viewport centered on a geographic coordinate
    pub fn centered_on(center: LatLng, meters_per_pixel: f64, screen_bounds: Bounds) -> Self {
        let world_center = center.to_world();
        let origin = Point::new(
            world_center.x - screen_bounds.width() / 2.0 * meters_per_pixel,
            world_center.y - screen_bounds.height() / 2.0 * meters_per_pixel,
        );
        Self::new(screen_bounds, origin, meters_per_pixel)
    }

    /// Whether the viewport describes a drawable region. Until the owning
    /// view has been laid out this is false and viewport updates are no-ops.
    pub fn is_renderable(&self) -> bool {
        self.meters_per_pixel > 0.0
            && self.screen_bounds.width() > 0.0
            && self.screen_bounds.height() > 0.0
    }

    /// Converts a world-meter position to screen pixels
    pub fn world_to_screen(&self, world: Point) -> Point {
        Point::new(
            (world.x - self.world_origin.x) / self.meters_per_pixel + self.screen_bounds.min.x,
            (world.y - self.world_origin.y) / self.meters_per_pixel + self.screen_bounds.min.y,
        )
    }

    /// Converts a screen-pixel position to world meters
    pub fn screen_to_world(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.screen_bounds.min.x) * self.meters_per_pixel + self.world_origin.x,
            (screen.y - self.screen_bounds.min.y) * self.meters_per_pixel + self.world_origin.y,
        )
    }
}
