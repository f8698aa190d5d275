use crate::core::geo::Point;
use serde::{Deserialize, Serialize};

/// Represents a bounding box in screen/pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    /// Creates new bounds from two points
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Creates bounds from individual coordinates
    pub fn from_coords(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(Point::new(min_x, min_y), Point::new(max_x, max_y))
    }

    /// Creates bounds from an origin point and size
    pub fn from_origin_and_size(origin: Point, width: f64, height: f64) -> Self {
        Self::new(origin, Point::new(origin.x + width, origin.y + height))
    }

    /// Gets the width of the bounds
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Gets the height of the bounds
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Gets the center point of the bounds
    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    /// Checks if the bounds contain a point
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Checks if the bounds fully contain another bounds
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        other.min.x >= self.min.x
            && other.min.y >= self.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    /// Checks if the bounds intersect with another bounds
    pub fn intersects(&self, other: &Bounds) -> bool {
        !(other.max.x < self.min.x
            || other.min.x > self.max.x
            || other.max.y < self.min.y
            || other.min.y > self.max.y)
    }

    /// Extends the bounds to include another bounds
    pub fn extend_bounds(&mut self, other: &Bounds) {
        self.min.x = self.min.x.min(other.min.x);
        self.min.y = self.min.y.min(other.min.y);
        self.max.x = self.max.x.max(other.max.x);
        self.max.y = self.max.y.max(other.max.y);
    }

    /// Returns a copy translated by `delta`
    pub fn translated(&self, delta: Point) -> Bounds {
        Bounds::new(self.min.add(&delta), self.max.add(&delta))
    }

    /// Returns a copy scaled by `factor` about a fixed pivot point
    pub fn scaled_about(&self, factor: f64, pivot: Point) -> Bounds {
        let scale = |p: &Point| {
            Point::new(
                pivot.x + (p.x - pivot.x) * factor,
                pivot.y + (p.y - pivot.y) * factor,
            )
        };
        Bounds::new(scale(&self.min), scale(&self.max))
    }

    /// Checks if the bounds are valid (min <= max)
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Creates empty bounds (invalid bounds that can be extended)
    pub fn empty() -> Self {
        Self::new(
            Point::new(f64::INFINITY, f64::INFINITY),
            Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        )
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new(Point::new(0.0, 0.0), Point::new(0.0, 0.0))
    }
}
