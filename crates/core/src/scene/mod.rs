//! Per-cell working set.
//!
//! A [`Scene`] holds everything the path finder needs for the receivers of one
//! cell: obstacles, ground, terrain and sources fetched around the cell, plus
//! the receivers the cell owns. It is built by [`SceneAssembler`], borrowed by
//! the propagation engine, and dropped when the cell completes.

pub mod assembler;
pub mod emission;
pub mod soil;

pub use assembler::SceneAssembler;
pub use emission::{discover_frequency_bands, EmissionModel, TableSpectrumEmission};
pub use soil::split_soil;

use geo::{coord, Contains, Intersects, Line, Point, Polygon};

use crate::config::PeriodValues;
use crate::core_types::{Envelope, FrequencyBand, Vec3};
use crate::grid::{CellIndex, SpatialIndex};

/// Search radii tried in turn when looking up the nearest elevation sample.
const ELEVATION_SEARCH_RADII: [f64; 5] = [25.0, 50.0, 100.0, 200.0, 400.0];

/// Spacing of the samples used to test a sight line against a footprint, metres.
const SIGHT_LINE_STEP: f64 = 1.0;

/// An obstacle.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub id: Option<i64>,
    pub footprint: Polygon<f64>,
    /// Height above the base elevation. Infinite when unknown.
    pub height: f64,
    /// Ground elevation under the building.
    pub base_z: f64,
    /// Wall absorption coefficient.
    pub absorption: f64,
    pub envelope: Envelope,
}

impl Building {
    /// Absolute elevation of the roof.
    #[must_use]
    pub fn top_z(&self) -> f64 {
        self.base_z + self.height
    }
}

/// A ground tile with its absorption coefficient G.
#[derive(Debug, Clone, PartialEq)]
pub struct SoilArea {
    pub area: Polygon<f64>,
    pub g: f64,
}

/// A source with its emission, as linear power per band and period.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSource {
    pub id: i64,
    /// Vertices, a single one for a point source.
    pub geometry: Vec<Vec3>,
    /// Power per band. Periods that are not computed stay empty.
    pub power: PeriodValues<Vec<f64>>,
    pub envelope: Envelope,
}

impl SceneSource {
    #[must_use]
    pub fn is_point(&self) -> bool {
        self.geometry.len() == 1
    }
}

/// A receiver owned by the scene's cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneReceiver {
    pub id: i64,
    pub position: Vec3,
}

/// Search limits copied from the run configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    pub max_propagation_distance: f64,
    pub max_reflection_distance: f64,
    pub reflection_order: u32,
}

/// Working set of one cell.
#[derive(Debug, Clone)]
pub struct Scene {
    pub cell: CellIndex,
    pub cell_envelope: Envelope,
    pub bands: Vec<FrequencyBand>,
    pub limits: SearchLimits,
    pub buildings: Vec<Building>,
    pub soil: Vec<SoilArea>,
    pub elevation: Vec<Vec3>,
    pub sources: Vec<SceneSource>,
    pub receivers: Vec<SceneReceiver>,
    /// G used where no soil area applies.
    pub default_ground_factor: f64,
    building_index: SpatialIndex,
    soil_index: SpatialIndex,
    elevation_index: SpatialIndex,
    source_index: SpatialIndex,
}

impl Scene {
    /// Assemble a scene and index its features.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell: CellIndex,
        cell_envelope: Envelope,
        bands: Vec<FrequencyBand>,
        limits: SearchLimits,
        buildings: Vec<Building>,
        soil: Vec<SoilArea>,
        elevation: Vec<Vec3>,
        sources: Vec<SceneSource>,
        receivers: Vec<SceneReceiver>,
    ) -> Self {
        let building_index = SpatialIndex::from_envelopes(buildings.iter().map(|b| b.envelope));
        let soil_index = SpatialIndex::from_envelopes(soil.iter().map(|s| Envelope::of_polygon(&s.area)));
        let elevation_index =
            SpatialIndex::from_envelopes(elevation.iter().map(|p| Envelope::from_point(p.x, p.y)));
        let source_index = SpatialIndex::from_envelopes(sources.iter().map(|s| s.envelope));
        Self {
            cell,
            cell_envelope,
            bands,
            limits,
            buildings,
            soil,
            elevation,
            sources,
            receivers,
            default_ground_factor: 0.0,
            building_index,
            soil_index,
            elevation_index,
            source_index,
        }
    }

    /// Indexes of sources whose envelope comes within `radius` of `(x, y)`.
    #[must_use]
    pub fn sources_near(&self, x: f64, y: f64, radius: f64) -> Vec<usize> {
        let window = Envelope::from_point(x, y).expand_by(radius);
        self.source_index
            .query(&window)
            .into_iter()
            .filter(|&id| self.sources[id].envelope.intersects(&window))
            .collect()
    }

    /// Elevation of the nearest terrain sample, `None` without terrain data nearby.
    #[must_use]
    pub fn elevation_at(&self, x: f64, y: f64) -> Option<f64> {
        if self.elevation.is_empty() {
            return None;
        }
        for radius in ELEVATION_SEARCH_RADII {
            let window = Envelope::from_point(x, y).expand_by(radius);
            let nearest = self
                .elevation_index
                .query(&window)
                .into_iter()
                .map(|id| &self.elevation[id])
                .min_by(|a, b| {
                    let da = (a.x - x).powi(2) + (a.y - y).powi(2);
                    let db = (b.x - x).powi(2) + (b.y - y).powi(2);
                    da.total_cmp(&db)
                });
            if let Some(sample) = nearest {
                return Some(sample.z);
            }
        }
        None
    }

    /// Ground absorption coefficient at `(x, y)`.
    #[must_use]
    pub fn ground_factor_at(&self, x: f64, y: f64) -> f64 {
        let point = Point::new(x, y);
        self.soil_index
            .query(&Envelope::from_point(x, y))
            .into_iter()
            .map(|id| &self.soil[id])
            .find(|tile| tile.area.intersects(&point))
            .map_or(self.default_ground_factor, |tile| tile.g)
    }

    /// True when a building stands between `from` and `to`.
    ///
    /// The sight line is blocked when it crosses a footprint below the roof.
    #[must_use]
    pub fn is_obstructed(&self, from: &Vec3, to: &Vec3) -> bool {
        let window = Envelope::new(from.x, from.y, to.x, to.y);
        let line = Line::new(coord! { x: from.x, y: from.y }, coord! { x: to.x, y: to.y });
        let horizontal = (to.xy() - from.xy()).norm();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = ((horizontal / SIGHT_LINE_STEP).ceil() as usize).clamp(1, 10_000);

        self.building_index
            .query(&window)
            .into_iter()
            .map(|id| &self.buildings[id])
            .filter(|building| building.envelope.intersects(&window))
            .filter(|building| building.footprint.intersects(&line))
            .any(|building| {
                let top = building.top_z();
                (0..=steps).any(|k| {
                    #[allow(clippy::cast_precision_loss)]
                    let t = k as f64 / steps as f64;
                    let sample = from + (to - from) * t;
                    sample.z < top && building.footprint.contains(&Point::new(sample.x, sample.y))
                })
            })
    }
}
