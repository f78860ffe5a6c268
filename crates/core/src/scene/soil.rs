//! Splitting of soil areas into square tiles.
//!
//! Large irregular soil polygons make every point-in-area lookup expensive.
//! They are cut along a fixed lattice of `side × side` squares aligned on
//! multiples of `side`, so each tile stays small and local.

use geo::Intersects;

use super::SoilArea;
use crate::core_types::{check_polygon, clip_polygon, Envelope};
use crate::error::TopologyError;

/// Tiles of `soil` covering the part of it inside `fetch_envelope`.
///
/// Tiles that fail to clip are reported in the second vector and left out of
/// the first one.
#[must_use]
pub fn split_soil(
    soil: &SoilArea,
    fetch_envelope: &Envelope,
    side: f64,
) -> (Vec<SoilArea>, Vec<TopologyError>) {
    let mut tiles = Vec::new();
    let mut failures = Vec::new();
    if let Err(err) = check_polygon(&soil.area) {
        failures.push(err);
        return (tiles, failures);
    }
    let bounds = Envelope::of_polygon(&soil.area);
    if bounds.is_null() || !bounds.intersects(fetch_envelope) || !(side > 0.0) {
        return (tiles, failures);
    }

    let lattice = |value: f64| (value / side).floor() * side;
    let start_x = lattice(fetch_envelope.min_x).max(lattice(bounds.min_x));
    let start_y = lattice(fetch_envelope.min_y).max(lattice(bounds.min_y));
    let max_x = fetch_envelope.max_x.min(bounds.max_x);
    let max_y = fetch_envelope.max_y.min(bounds.max_y);

    let mut x = start_x;
    while x < max_x {
        let mut y = start_y;
        while y < max_y {
            let tile = Envelope::new(x, y, x + side, y + side);
            if soil.area.intersects(&tile.to_polygon()) {
                match clip_polygon(&soil.area, &tile) {
                    Ok(parts) => tiles.extend(parts.into_iter().map(|area| SoilArea {
                        area,
                        g: soil.g,
                    })),
                    Err(err) => failures.push(err),
                }
            }
            y += side;
        }
        x += side;
    }
    (tiles, failures)
}
