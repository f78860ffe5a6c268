//! Input geometries with optional elevation.

use std::panic::{self, AssertUnwindSafe};

use geo::{Area, BooleanOps, Intersects, LineString, Polygon};
use serde::{Deserialize, Serialize};

use super::envelope::Envelope;
use super::vec3::Vec3;
use crate::error::TopologyError;

/// A coordinate as read from an input table. `z` is `None` when the table
/// stores a 2D geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate3 {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: Option<f64>,
}

impl Coordinate3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// Coordinate without elevation.
    #[must_use]
    pub const fn flat(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    /// 3D position, `None` when the elevation is missing or not a number.
    #[must_use]
    pub fn to_vec3(&self) -> Option<Vec3> {
        self.z
            .filter(|z| !z.is_nan())
            .map(|z| Vec3::new(self.x, self.y, z))
    }
}

/// Sound source geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum SourceGeometry {
    Point(Coordinate3),
    LineString(Vec<Coordinate3>),
}

impl SourceGeometry {
    #[must_use]
    pub fn coordinates(&self) -> &[Coordinate3] {
        match self {
            Self::Point(point) => std::slice::from_ref(point),
            Self::LineString(points) => points,
        }
    }

    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope::from_points(self.coordinates().iter().map(|c| (c.x, c.y)))
    }

    /// All vertices in 3D, `None` when any of them lacks elevation.
    #[must_use]
    pub fn to_vec3(&self) -> Option<Vec<Vec3>> {
        self.coordinates().iter().map(Coordinate3::to_vec3).collect()
    }
}

fn ring_wkt(ring: &LineString<f64>) -> String {
    let coords: Vec<String> = ring.coords().map(|c| format!("{} {}", c.x, c.y)).collect();
    format!("({})", coords.join(", "))
}

/// WKT text of a polygon, used when logging geometries that failed to clip.
#[must_use]
pub fn polygon_wkt(polygon: &Polygon<f64>) -> String {
    let mut rings = vec![ring_wkt(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_wkt));
    format!("POLYGON ({})", rings.join(", "))
}

fn topology_error(polygon: &Polygon<f64>, reason: &str) -> TopologyError {
    TopologyError {
        geometry: polygon_wkt(polygon),
        reason: reason.to_string(),
    }
}

/// Reject polygons the boolean operations cannot handle.
///
/// # Errors
///
/// Returns a [`TopologyError`] naming the defect.
pub fn check_polygon(polygon: &Polygon<f64>) -> Result<(), TopologyError> {
    if polygon.exterior().0.len() < 4 {
        return Err(topology_error(polygon, "exterior ring has fewer than 3 distinct points"));
    }
    let finite = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .flat_map(|ring| ring.coords())
        .all(|c| c.x.is_finite() && c.y.is_finite());
    if !finite {
        return Err(topology_error(polygon, "non-finite coordinate"));
    }
    if polygon.unsigned_area() <= 0.0 {
        return Err(topology_error(polygon, "zero area"));
    }
    Ok(())
}

/// Part of `polygon` inside `window`, as zero or more polygons.
///
/// # Errors
///
/// Returns a [`TopologyError`] for degenerate input or when the intersection
/// cannot be computed.
pub fn clip_polygon(
    polygon: &Polygon<f64>,
    window: &Envelope,
) -> Result<Vec<Polygon<f64>>, TopologyError> {
    check_polygon(polygon)?;
    let bounds = Envelope::of_polygon(polygon);
    if !bounds.intersects(window) {
        return Ok(Vec::new());
    }
    if window.contains(&bounds) {
        return Ok(vec![polygon.clone()]);
    }
    let rect = window.to_polygon();
    if !polygon.intersects(&rect) {
        return Ok(Vec::new());
    }
    let clipped = panic::catch_unwind(AssertUnwindSafe(|| polygon.intersection(&rect)))
        .map_err(|_| topology_error(polygon, "intersection failed"))?;
    Ok(clipped
        .into_iter()
        .filter(|part| part.unsigned_area() > 0.0)
        .collect())
}
