//! Input tables of a run.
//!
//! [`InputStore`] is the seam to whatever holds the geographic data. Every
//! fetch takes an envelope and returns the rows whose geometry intersects it.
//! [`MemoryInputStore`] keeps everything in memory behind spatial indexes.

use std::collections::BTreeMap;

use geo::Polygon;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::core_types::{Coordinate3, Envelope, SourceGeometry, Vec3};
use crate::error::SchemaError;
use crate::grid::SpatialIndex;

/// Shape of an input table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Name of the unique identifier column, `None` when the table has none.
    pub primary_key: Option<String>,
    /// Name of the geometry column, `None` when the table has none.
    pub geometry_column: Option<String>,
}

impl TableSchema {
    /// Schema with a `PK` primary key and a `THE_GEOM` geometry column.
    #[must_use]
    pub fn keyed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: Some("PK".to_string()),
            geometry_column: Some("THE_GEOM".to_string()),
        }
    }

    /// # Errors
    ///
    /// [`SchemaError::MissingPrimaryKey`] when the table has no identifier.
    pub fn require_primary_key(&self) -> Result<&str, SchemaError> {
        self.primary_key
            .as_deref()
            .ok_or_else(|| SchemaError::MissingPrimaryKey {
                table: self.name.clone(),
            })
    }

    /// # Errors
    ///
    /// [`SchemaError::MissingGeometry`] when the table has no geometry column.
    pub fn require_geometry(&self) -> Result<&str, SchemaError> {
        self.geometry_column
            .as_deref()
            .ok_or_else(|| SchemaError::MissingGeometry {
                table: self.name.clone(),
            })
    }
}

/// A receiver row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverRecord {
    pub id: i64,
    pub position: Coordinate3,
}

/// A source row with its numeric attributes (emission columns and the like).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub geometry: SourceGeometry,
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
}

/// A building row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub footprint: Polygon<f64>,
    /// Height above ground, `None` for an infinitely high obstacle.
    #[serde(default)]
    pub height: Option<f64>,
    /// Wall absorption, `None` to use the run default.
    #[serde(default)]
    pub alpha: Option<f64>,
}

/// A soil row: an area with a ground absorption coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilRecord {
    pub area: Polygon<f64>,
    pub g: f64,
}

/// Source of the input tables of a run.
pub trait InputStore {
    fn receivers_schema(&self) -> &TableSchema;

    fn sources_schema(&self) -> &TableSchema;

    /// Names of the numeric columns of the source table.
    fn source_field_names(&self) -> Vec<String>;

    /// Horizontal positions of every receiver, used to size the domain.
    ///
    /// # Errors
    ///
    /// Fails when the receiver table cannot be read or two receivers share a
    /// primary key.
    fn receiver_positions(&self) -> Result<Vec<(f64, f64)>, SchemaError>;

    /// Receivers inside `envelope` (closed bounds).
    ///
    /// # Errors
    ///
    /// Fails when the receiver table cannot be read.
    fn fetch_receivers(&self, envelope: &Envelope) -> Result<Vec<ReceiverRecord>, SchemaError>;

    /// Sources whose geometry envelope intersects `envelope`.
    ///
    /// # Errors
    ///
    /// Fails when the source table cannot be read.
    fn fetch_sources(&self, envelope: &Envelope) -> Result<Vec<SourceRecord>, SchemaError>;

    /// Buildings whose footprint envelope intersects `envelope`.
    ///
    /// # Errors
    ///
    /// Fails when the building table cannot be read.
    fn fetch_buildings(&self, envelope: &Envelope) -> Result<Vec<BuildingRecord>, SchemaError>;

    /// Soil areas whose envelope intersects `envelope`.
    ///
    /// # Errors
    ///
    /// Fails when the soil table cannot be read.
    fn fetch_soil(&self, envelope: &Envelope) -> Result<Vec<SoilRecord>, SchemaError>;

    /// Elevation samples inside `envelope`.
    ///
    /// # Errors
    ///
    /// Fails when the elevation table cannot be read.
    fn fetch_elevation(&self, envelope: &Envelope) -> Result<Vec<Vec3>, SchemaError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Rows of one table with a spatial index over their envelopes.
#[derive(Debug, Clone)]
struct IndexedTable<R> {
    schema: TableSchema,
    rows: Vec<R>,
    index: SpatialIndex,
    envelopes: Vec<Envelope>,
}

impl<R> IndexedTable<R> {
    fn new(schema: TableSchema, rows: Vec<R>, envelope_of: impl Fn(&R) -> Envelope) -> Self {
        let envelopes: Vec<Envelope> = rows.iter().map(envelope_of).collect();
        let index = SpatialIndex::from_envelopes(envelopes.iter().copied());
        Self {
            schema,
            rows,
            index,
            envelopes,
        }
    }

    fn empty(name: &str) -> Self {
        Self::new(TableSchema::keyed(name), Vec::new(), |_| Envelope::null())
    }

    fn fetch(&self, envelope: &Envelope) -> Result<Vec<R>, SchemaError>
    where
        R: Clone,
    {
        self.schema.require_geometry()?;
        Ok(self
            .index
            .query(envelope)
            .into_iter()
            .filter(|&id| self.envelopes[id].intersects(envelope))
            .map(|id| self.rows[id].clone())
            .collect())
    }
}

/// Input tables held in memory.
#[derive(Debug, Clone)]
pub struct MemoryInputStore {
    receivers: IndexedTable<ReceiverRecord>,
    sources: IndexedTable<SourceRecord>,
    buildings: IndexedTable<BuildingRecord>,
    soil: IndexedTable<SoilRecord>,
    elevation: IndexedTable<Vec3>,
}

impl Default for MemoryInputStore {
    fn default() -> Self {
        Self {
            receivers: IndexedTable::empty("RECEIVERS"),
            sources: IndexedTable::empty("SOURCES"),
            buildings: IndexedTable::empty("BUILDINGS"),
            soil: IndexedTable::empty("GROUND"),
            elevation: IndexedTable::empty("DEM"),
        }
    }
}

impl MemoryInputStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_receivers(mut self, schema: TableSchema, rows: Vec<ReceiverRecord>) -> Self {
        self.receivers = IndexedTable::new(schema, rows, |r| {
            Envelope::from_point(r.position.x, r.position.y)
        });
        self
    }

    #[must_use]
    pub fn with_sources(mut self, schema: TableSchema, rows: Vec<SourceRecord>) -> Self {
        self.sources = IndexedTable::new(schema, rows, |s| s.geometry.envelope());
        self
    }

    #[must_use]
    pub fn with_buildings(mut self, rows: Vec<BuildingRecord>) -> Self {
        let schema = self.buildings.schema.clone();
        self.buildings = IndexedTable::new(schema, rows, |b| Envelope::of_polygon(&b.footprint));
        self
    }

    #[must_use]
    pub fn with_soil(mut self, rows: Vec<SoilRecord>) -> Self {
        let schema = self.soil.schema.clone();
        self.soil = IndexedTable::new(schema, rows, |s| Envelope::of_polygon(&s.area));
        self
    }

    #[must_use]
    pub fn with_elevation(mut self, rows: Vec<Vec3>) -> Self {
        let schema = self.elevation.schema.clone();
        self.elevation = IndexedTable::new(schema, rows, |p| Envelope::from_point(p.x, p.y));
        self
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.receivers.rows.len()
    }
}

impl InputStore for MemoryInputStore {
    fn receivers_schema(&self) -> &TableSchema {
        &self.receivers.schema
    }

    fn sources_schema(&self) -> &TableSchema {
        &self.sources.schema
    }

    fn source_field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .rows
            .iter()
            .flat_map(|row| row.fields.keys().cloned())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    fn receiver_positions(&self) -> Result<Vec<(f64, f64)>, SchemaError> {
        self.receivers.schema.require_geometry()?;
        let mut seen = FxHashSet::default();
        self.receivers
            .rows
            .iter()
            .map(|r| {
                if seen.insert(r.id) {
                    Ok((r.position.x, r.position.y))
                } else {
                    Err(SchemaError::DuplicatePrimaryKey {
                        table: self.receivers.schema.name.clone(),
                        primary_key: r.id,
                    })
                }
            })
            .collect()
    }

    fn fetch_receivers(&self, envelope: &Envelope) -> Result<Vec<ReceiverRecord>, SchemaError> {
        self.receivers.fetch(envelope)
    }

    fn fetch_sources(&self, envelope: &Envelope) -> Result<Vec<SourceRecord>, SchemaError> {
        self.sources.fetch(envelope)
    }

    fn fetch_buildings(&self, envelope: &Envelope) -> Result<Vec<BuildingRecord>, SchemaError> {
        self.buildings.fetch(envelope)
    }

    fn fetch_soil(&self, envelope: &Envelope) -> Result<Vec<SoilRecord>, SchemaError> {
        self.soil.fetch(envelope)
    }

    fn fetch_elevation(&self, envelope: &Envelope) -> Result<Vec<Vec3>, SchemaError> {
        self.elevation.fetch(envelope)
    }
}
