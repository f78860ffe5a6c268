//! Builds the [`Scene`] of one grid cell.
//!
//! Features are fetched in windows around the cell:
//!
//! - buildings, soil and terrain within `d + 2·r` of the cell, `d` the maximum
//!   propagation distance and `r` the maximum reflection distance;
//! - sources within `d` of the cell;
//! - receivers inside the cell itself, edges included.
//!
//! Cell windows overlap, so a receiver lying on a shared edge is fetched by
//! several cells. Only the first cell claiming it in the run context keeps it.

use geo::Centroid;
use tracing::{info, warn};

use super::emission::EmissionModel;
use super::soil::split_soil;
use super::{Building, Scene, SceneReceiver, SceneSource, SearchLimits, SoilArea};
use crate::config::{PeriodValues, RunConfig};
use crate::context::RunContext;
use crate::core_types::{clip_polygon, Envelope, FrequencyBand};
use crate::error::{NoiseMapError, SchemaError};
use crate::grid::{CellIndex, DomainGrid};
use crate::store::InputStore;

/// Assembles cell scenes for one run.
pub struct SceneAssembler<'a> {
    config: &'a RunConfig,
    grid: &'a DomainGrid,
    bands: &'a [FrequencyBand],
    emission: &'a dyn EmissionModel,
}

impl<'a> SceneAssembler<'a> {
    #[must_use]
    pub fn new(
        config: &'a RunConfig,
        grid: &'a DomainGrid,
        bands: &'a [FrequencyBand],
        emission: &'a dyn EmissionModel,
    ) -> Self {
        Self {
            config,
            grid,
            bands,
            emission,
        }
    }

    /// Fetch and prepare everything the receivers of `cell` need.
    ///
    /// Receivers of the cell are claimed in `context`; those claimed by an
    /// earlier cell are left out.
    ///
    /// # Errors
    ///
    /// [`SchemaError::MissingPrimaryKey`] or [`SchemaError::MissingGeometry`]
    /// when the receiver or source table cannot be read,
    /// [`SchemaError::MissingZOrdinate`] when a source or receiver has no
    /// elevation, and any error of the emission model.
    pub fn assemble_cell(
        &self,
        cell: CellIndex,
        store: &dyn InputStore,
        context: &RunContext,
    ) -> Result<Scene, NoiseMapError> {
        let receivers_table = store.receivers_schema();
        let sources_table = store.sources_schema();
        receivers_table.require_primary_key()?;
        receivers_table.require_geometry()?;
        sources_table.require_primary_key()?;
        sources_table.require_geometry()?;

        let cell_envelope = self.grid.cell_envelope(cell);
        let obstruction_envelope = cell_envelope.expand_by(self.config.obstruction_margin());
        let source_envelope = cell_envelope.expand_by(self.config.max_propagation_distance);

        let elevation = store.fetch_elevation(&obstruction_envelope)?;
        let buildings = self.fetch_buildings(store, &obstruction_envelope)?;
        let soil = self.fetch_soil(store, &obstruction_envelope)?;
        let sources = self.fetch_sources(store, &source_envelope, &sources_table.name)?;

        let mut receivers = Vec::new();
        for record in store.fetch_receivers(&cell_envelope)? {
            if !cell_envelope.contains_point(record.position.x, record.position.y) {
                continue;
            }
            let position = record
                .position
                .to_vec3()
                .ok_or_else(|| SchemaError::MissingZOrdinate {
                    table: receivers_table.name.clone(),
                    primary_key: record.id,
                })?;
            if context.mark_receiver(record.id) {
                receivers.push(SceneReceiver {
                    id: record.id,
                    position,
                });
            }
        }

        info!(
            "Cell ({}, {}): {} receivers, {} sources, {} buildings, {} soil tiles",
            cell.i,
            cell.j,
            receivers.len(),
            sources.len(),
            buildings.len(),
            soil.len()
        );

        let mut scene = Scene::new(
            cell,
            cell_envelope,
            self.bands.to_vec(),
            SearchLimits {
                max_propagation_distance: self.config.max_propagation_distance,
                max_reflection_distance: self.config.max_reflection_distance,
                reflection_order: self.config.reflection_order,
            },
            buildings,
            soil,
            elevation,
            sources,
            receivers,
        );
        let base: Vec<f64> = scene
            .buildings
            .iter()
            .map(|building| {
                building
                    .footprint
                    .centroid()
                    .and_then(|c| scene.elevation_at(c.x(), c.y()))
                    .unwrap_or(0.0)
            })
            .collect();
        for (building, base_z) in scene.buildings.iter_mut().zip(base) {
            building.base_z = base_z;
        }
        Ok(scene)
    }

    fn fetch_buildings(
        &self,
        store: &dyn InputStore,
        window: &Envelope,
    ) -> Result<Vec<Building>, SchemaError> {
        let mut buildings = Vec::new();
        for record in store.fetch_buildings(window)? {
            match clip_polygon(&record.footprint, window) {
                Ok(parts) => buildings.extend(parts.into_iter().map(|footprint| Building {
                    id: record.id,
                    envelope: Envelope::of_polygon(&footprint),
                    footprint,
                    height: record.height.unwrap_or(f64::INFINITY),
                    base_z: 0.0,
                    absorption: record.alpha.unwrap_or(self.config.wall_absorption),
                })),
                Err(err) => warn!("Skipping building {:?}: {err}", record.id),
            }
        }
        Ok(buildings)
    }

    fn fetch_soil(
        &self,
        store: &dyn InputStore,
        window: &Envelope,
    ) -> Result<Vec<SoilArea>, SchemaError> {
        let mut tiles = Vec::new();
        for record in store.fetch_soil(window)? {
            let area = SoilArea {
                area: record.area,
                g: record.g,
            };
            let (parts, failures) = split_soil(&area, window, self.config.ground_split_side_length);
            for err in failures {
                warn!("Skipping soil tile: {err}");
            }
            tiles.extend(parts);
        }
        Ok(tiles)
    }

    fn fetch_sources(
        &self,
        store: &dyn InputStore,
        window: &Envelope,
        table: &str,
    ) -> Result<Vec<SceneSource>, NoiseMapError> {
        let periods = self.config.periods.computed_periods();
        let mut sources = Vec::new();
        for record in store.fetch_sources(window)? {
            let geometry = record
                .geometry
                .to_vec3()
                .ok_or_else(|| SchemaError::MissingZOrdinate {
                    table: table.to_string(),
                    primary_key: record.id,
                })?;
            let mut power = PeriodValues::<Vec<f64>>::default();
            for &period in &periods {
                power.set(
                    period,
                    self.emission.emission(&record, table, period, self.bands)?,
                );
            }
            sources.push(SceneSource {
                id: record.id,
                envelope: record.geometry.envelope(),
                geometry,
                power,
            });
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimePeriod;
    use crate::core_types::{octave_bands, Coordinate3, SourceGeometry};
    use crate::scene::TableSpectrumEmission;
    use crate::store::{
        BuildingRecord, MemoryInputStore, ReceiverRecord, SoilRecord, SourceRecord, TableSchema,
    };
    use geo::polygon;
    use std::collections::BTreeMap;

    fn emission_fields(level: f64) -> BTreeMap<String, f64> {
        let model = TableSpectrumEmission::default();
        let mut fields = BTreeMap::new();
        for period in TimePeriod::ALL {
            for band in &octave_bands() {
                fields.insert(model.column_name(period, band), level);
            }
        }
        fields
    }

    fn receiver(id: i64, x: f64, y: f64) -> ReceiverRecord {
        ReceiverRecord {
            id,
            position: Coordinate3::new(x, y, 4.0),
        }
    }

    fn store(receivers: Vec<ReceiverRecord>) -> MemoryInputStore {
        MemoryInputStore::new()
            .with_receivers(TableSchema::keyed("RECEIVERS"), receivers)
            .with_sources(
                TableSchema::keyed("SOURCES"),
                vec![
                    SourceRecord {
                        id: 1,
                        geometry: SourceGeometry::Point(Coordinate3::new(500.0, 500.0, 0.05)),
                        fields: emission_fields(90.0),
                    },
                    SourceRecord {
                        id: 2,
                        geometry: SourceGeometry::Point(Coordinate3::new(5_000.0, 5_000.0, 0.05)),
                        fields: emission_fields(90.0),
                    },
                ],
            )
            .with_buildings(vec![BuildingRecord {
                id: Some(7),
                footprint: polygon![(x: 600.0, y: 600.0), (x: 620.0, y: 600.0), (x: 620.0, y: 620.0), (x: 600.0, y: 620.0)],
                height: Some(12.0),
                alpha: None,
            }])
            .with_soil(vec![SoilRecord {
                area: polygon![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0)],
                g: 0.7,
            }])
    }

    fn grid() -> DomainGrid {
        // 4 × 4 cells of 2 km
        DomainGrid::new(Envelope::new(0.0, 0.0, 8_000.0, 8_000.0), 750.0, 0.3).unwrap()
    }

    #[test]
    fn test_assemble_cell_fetches_windows() {
        let config = RunConfig::default();
        let grid = grid();
        let bands = octave_bands();
        let emission = TableSpectrumEmission::default();
        let assembler = SceneAssembler::new(&config, &grid, &bands, &emission);
        let context = RunContext::new(config.clone());
        let store = store(vec![receiver(1, 100.0, 100.0), receiver(2, 3_000.0, 3_000.0)]);

        let scene = assembler.assemble_cell(CellIndex::new(0, 0), &store, &context).unwrap();
        assert_eq!(scene.receivers.len(), 1);
        assert_eq!(scene.receivers[0].id, 1);
        assert_eq!(scene.sources.len(), 1);
        assert_eq!(scene.sources[0].power.night.len(), 8);
        assert_eq!(scene.buildings.len(), 1);
        assert_eq!(scene.buildings[0].absorption, config.wall_absorption);
        assert!(!scene.soil.is_empty());
        assert!(scene.soil.iter().all(|tile| tile.g == 0.7));
    }

    #[test]
    fn test_receiver_on_shared_edge_claimed_once() {
        let config = RunConfig::default();
        let grid = grid();
        let bands = octave_bands();
        let emission = TableSpectrumEmission::default();
        let assembler = SceneAssembler::new(&config, &grid, &bands, &emission);
        let context = RunContext::new(config.clone());
        let edge = grid.cell_envelope(CellIndex::new(0, 0)).max_x;
        let store = store(vec![receiver(9, edge, 10.0)]);

        let total: usize = grid
            .cells()
            .map(|cell| assembler.assemble_cell(cell, &store, &context).unwrap().receivers.len())
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_missing_z_is_rejected() {
        let config = RunConfig::default();
        let grid = grid();
        let bands = octave_bands();
        let emission = TableSpectrumEmission::default();
        let assembler = SceneAssembler::new(&config, &grid, &bands, &emission);
        let context = RunContext::new(config.clone());
        let store = store(vec![ReceiverRecord {
            id: 4,
            position: Coordinate3::flat(10.0, 10.0),
        }]);

        let result = assembler.assemble_cell(CellIndex::new(0, 0), &store, &context);
        assert!(matches!(
            result,
            Err(NoiseMapError::Schema(SchemaError::MissingZOrdinate { primary_key: 4, .. }))
        ));
        assert_eq!(context.processed_receiver_count(), 0);
    }

    #[test]
    fn test_missing_primary_key_is_rejected() {
        let config = RunConfig::default();
        let grid = grid();
        let bands = octave_bands();
        let emission = TableSpectrumEmission::default();
        let assembler = SceneAssembler::new(&config, &grid, &bands, &emission);
        let context = RunContext::new(config.clone());
        let schema = TableSchema {
            name: "RECEIVERS".to_string(),
            primary_key: None,
            geometry_column: Some("THE_GEOM".to_string()),
        };
        let store = MemoryInputStore::new().with_receivers(schema, vec![receiver(1, 1.0, 1.0)]);

        let result = assembler.assemble_cell(CellIndex::new(0, 0), &store, &context);
        assert!(matches!(
            result,
            Err(NoiseMapError::Schema(SchemaError::MissingPrimaryKey { .. }))
        ));
    }
}
