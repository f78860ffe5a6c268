//! Axis-aligned 2D envelopes.
//!
//! Envelopes bound every spatial query of a run: the computation domain, the
//! grid cells, and the fetch windows used to assemble a cell scene. Bounds are
//! closed, so a point on the edge of an envelope is inside it.

use geo::{coord, BoundingRect, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Closed axis-aligned rectangle in projected metres.
///
/// A *null* envelope has `min > max` on some axis and contains nothing. It is
/// the neutral element of [`Envelope::expand_to_include`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope from two corners, in any order.
    #[must_use]
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// The empty envelope.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Degenerate envelope covering a single point.
    #[must_use]
    pub const fn from_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Smallest envelope covering all given points, null when empty.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut envelope = Self::null();
        for (x, y) in points {
            envelope.expand_to_include_point(x, y);
        }
        envelope
    }

    /// True when the envelope contains nothing (also for NaN bounds).
    #[must_use]
    pub fn is_null(&self) -> bool {
        !(self.min_x <= self.max_x && self.min_y <= self.max_y)
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        if self.is_null() {
            0.0
        } else {
            self.max_x - self.min_x
        }
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        if self.is_null() {
            0.0
        } else {
            self.max_y - self.min_y
        }
    }

    /// Largest of width and height.
    #[must_use]
    pub fn max_extent(&self) -> f64 {
        self.width().max(self.height())
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Envelope grown by `distance` on every side. A null envelope stays null.
    #[must_use]
    pub fn expand_by(&self, distance: f64) -> Self {
        if self.is_null() {
            return *self;
        }
        Self {
            min_x: self.min_x - distance,
            min_y: self.min_y - distance,
            max_x: self.max_x + distance,
            max_y: self.max_y + distance,
        }
    }

    pub fn expand_to_include_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn expand_to_include(&mut self, other: &Self) {
        if other.is_null() {
            return;
        }
        self.expand_to_include_point(other.min_x, other.min_y);
        self.expand_to_include_point(other.max_x, other.max_y);
    }

    /// Closed containment test.
    #[must_use]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// True when `other` lies entirely inside this envelope.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        !other.is_null()
            && self.contains_point(other.min_x, other.min_y)
            && self.contains_point(other.max_x, other.max_y)
    }

    /// Closed intersection test, touching edges intersect.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_null()
            && !other.is_null()
            && other.min_x <= self.max_x
            && other.max_x >= self.min_x
            && other.min_y <= self.max_y
            && other.max_y >= self.min_y
    }

    /// Overlap of two envelopes, null when they are disjoint.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        if !self.intersects(other) {
            return Self::null();
        }
        Self {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    #[must_use]
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }

    /// Closed polygon covering the envelope.
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    #[must_use]
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Bounding envelope of a polygon, null for an empty polygon.
    #[must_use]
    pub fn of_polygon(polygon: &Polygon<f64>) -> Self {
        polygon
            .bounding_rect()
            .map_or_else(Self::null, |rect| Self::from_rect(&rect))
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::null()
    }
}
