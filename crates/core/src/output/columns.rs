//! Layout of the result tables.
//!
//! Which columns a table has depends on several run flags (merged sources,
//! LAeq only, receiver position, ground profile). The layout is computed once
//! from the [`RunConfig`] as a list of [`ColumnSpec`]s; creating the table,
//! rendering a record and building the SQL statements all walk that list.

use serde::{Deserialize, Serialize};

use super::queue::OutputRecord;
use crate::config::{ExportRaysMode, OutputSeries, RunConfig};
use crate::core_types::{clamp_level, energetic_sum_db, Vec3};
use crate::error::PersistenceError;

pub const RECEIVER_ID_COLUMN: &str = "IDRECEIVER";
pub const SOURCE_ID_COLUMN: &str = "IDSOURCE";
pub const GEOMETRY_COLUMN: &str = "THE_GEOM";

/// SQL type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    BigInt,
    Real,
    Text,
    PointZ,
    LineStringZ,
}

impl ColumnType {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Text => "VARCHAR",
            Self::PointZ => "GEOMETRY(POINTZ)",
            Self::LineStringZ => "GEOMETRY(LINESTRINGZ)",
        }
    }
}

/// Where the value of a column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    ReceiverId,
    SourceId,
    ReceiverPosition,
    /// Level of the band at this index.
    Band(usize),
    LAeq,
    Leq,
    RayGeometry,
    RayReceiverId,
    RaySourceId,
    RayGroundProfile,
    RayLeq,
    RayPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub source: ColumnSource,
}

impl ColumnSpec {
    fn new(name: impl Into<String>, column_type: ColumnType, source: ColumnSource) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
            source,
        }
    }

    fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// Key applied once all rows are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKey {
    PrimaryKey(Vec<String>),
    Index(Vec<String>),
    None,
}

/// A value of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    BigInt(i64),
    Real(f64),
    Text(String),
    PointZ(Vec3),
    LineStringZ(Vec<Vec3>),
}

impl Value {
    /// SQL literal. Non-finite reals are written as NULL.
    #[must_use]
    pub fn sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::BigInt(v) => v.to_string(),
            Self::Real(v) if v.is_finite() => format!("{v:?}"),
            Self::Real(_) => "NULL".to_string(),
            Self::Text(text) => format!("'{}'", text.replace('\'', "''")),
            Self::PointZ(p) => format!("'POINT Z({} {} {})'", p.x, p.y, p.z),
            Self::LineStringZ(points) => {
                let coords: Vec<String> = points
                    .iter()
                    .map(|p| format!("{} {} {}", p.x, p.y, p.z))
                    .collect();
                format!("'LINESTRING Z({})'", coords.join(", "))
            }
        }
    }
}

pub type Row = Vec<Value>;

/// A result table: its name, columns and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub series: OutputSeries,
    pub columns: Vec<ColumnSpec>,
    pub key: TableKey,
}

impl TableSpec {
    /// Layout of the level table of `series`.
    #[must_use]
    pub fn levels(config: &RunConfig, series: OutputSeries) -> Self {
        let mut columns =
            vec![ColumnSpec::new(RECEIVER_ID_COLUMN, ColumnType::BigInt, ColumnSource::ReceiverId).not_null()];
        if !config.merge_sources {
            columns.push(ColumnSpec::new(
                SOURCE_ID_COLUMN,
                ColumnType::BigInt,
                ColumnSource::SourceId,
            ));
        }
        if config.export_receiver_position {
            columns.push(ColumnSpec::new(
                GEOMETRY_COLUMN,
                ColumnType::PointZ,
                ColumnSource::ReceiverPosition,
            ));
        }
        if !config.compute_laeq_only {
            columns.extend(config.frequency_bands.iter().enumerate().map(|(k, band)| {
                ColumnSpec::new(format!("HZ{}", band.nominal), ColumnType::Real, ColumnSource::Band(k))
            }));
        }
        columns.push(ColumnSpec::new("LAEQ", ColumnType::Real, ColumnSource::LAeq));
        if !config.compute_laeq_only {
            columns.push(ColumnSpec::new("LEQ", ColumnType::Real, ColumnSource::Leq));
        }

        let key = if config.merge_sources {
            TableKey::PrimaryKey(vec![RECEIVER_ID_COLUMN.to_string()])
        } else {
            TableKey::Index(vec![
                RECEIVER_ID_COLUMN.to_string(),
                SOURCE_ID_COLUMN.to_string(),
            ])
        };
        Self {
            name: config.table_names.for_series(series).to_string(),
            series,
            columns,
            key,
        }
    }

    /// Layout of the rays table.
    #[must_use]
    pub fn rays(config: &RunConfig) -> Self {
        let mut columns = vec![
            ColumnSpec::new(GEOMETRY_COLUMN, ColumnType::LineStringZ, ColumnSource::RayGeometry),
            ColumnSpec::new(RECEIVER_ID_COLUMN, ColumnType::BigInt, ColumnSource::RayReceiverId).not_null(),
            ColumnSpec::new(SOURCE_ID_COLUMN, ColumnType::BigInt, ColumnSource::RaySourceId).not_null(),
        ];
        if config.export_ground_profile {
            columns.push(ColumnSpec::new("PATH", ColumnType::Text, ColumnSource::RayGroundProfile));
        }
        if config.export_ray_levels {
            columns.push(ColumnSpec::new("LEQ", ColumnType::Real, ColumnSource::RayLeq));
            columns.push(ColumnSpec::new("PERIOD", ColumnType::Text, ColumnSource::RayPeriod));
        }
        Self {
            name: config.table_names.rays.clone(),
            series: OutputSeries::Rays,
            columns,
            key: TableKey::None,
        }
    }

    #[must_use]
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// Values of `record` in column order.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Rejected`] when the record belongs to another
    /// series, [`PersistenceError::Serialization`] when the ground profile
    /// cannot be encoded.
    pub fn render(&self, record: &OutputRecord, floor: f64) -> Result<Row, PersistenceError> {
        if record.series() != self.series {
            return Err(PersistenceError::Rejected(format!(
                "{:?} record sent to table '{}'",
                record.series(),
                self.name
            )));
        }
        self.columns
            .iter()
            .map(|column| render_value(column.source, record, floor))
            .collect()
    }

    #[must_use]
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let null = if column.not_null { " NOT NULL" } else { "" };
                format!("{} {}{null}", column.name, column.column_type.sql())
            })
            .collect();
        format!("CREATE TABLE {} ({});", self.name, columns.join(", "))
    }

    #[must_use]
    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.name)
    }

    /// One multi-row insert, `None` for an empty batch.
    #[must_use]
    pub fn insert_sql(&self, rows: &[Row]) -> Option<String> {
        if rows.is_empty() {
            return None;
        }
        let values: Vec<String> = rows
            .iter()
            .map(|row| {
                let literals: Vec<String> = row.iter().map(Value::sql_literal).collect();
                format!("({})", literals.join(", "))
            })
            .collect();
        Some(format!(
            "INSERT INTO {} ({}) VALUES {};",
            self.name,
            self.column_names().join(", "),
            values.join(", ")
        ))
    }

    #[must_use]
    pub fn key_sql(&self) -> Option<String> {
        match &self.key {
            TableKey::PrimaryKey(columns) => Some(format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({});",
                self.name,
                columns.join(", ")
            )),
            TableKey::Index(columns) => Some(format!(
                "CREATE INDEX {}_{}_IDX ON {} ({});",
                self.name,
                columns.join("_"),
                self.name,
                columns.join(", ")
            )),
            TableKey::None => None,
        }
    }
}

fn render_value(
    source: ColumnSource,
    record: &OutputRecord,
    floor: f64,
) -> Result<Value, PersistenceError> {
    let value = match (source, record) {
        (ColumnSource::ReceiverId, OutputRecord::Level { record, .. }) => Value::BigInt(record.receiver_id),
        (ColumnSource::SourceId, OutputRecord::Level { record, .. }) => {
            record.source_id.map_or(Value::Null, Value::BigInt)
        }
        (ColumnSource::ReceiverPosition, OutputRecord::Level { record, .. }) => {
            record.position.map_or(Value::Null, Value::PointZ)
        }
        (ColumnSource::Band(k), OutputRecord::Level { record, .. }) => {
            record.levels.get(k).map_or(Value::Null, |&level| Value::Real(level))
        }
        (ColumnSource::LAeq, OutputRecord::Level { record, .. }) => Value::Real(record.laeq),
        (ColumnSource::Leq, OutputRecord::Level { record, .. }) => Value::Real(record.leq),
        (ColumnSource::RayGeometry, OutputRecord::Ray(path)) => Value::LineStringZ(path.points.clone()),
        (ColumnSource::RayReceiverId, OutputRecord::Ray(path)) => Value::BigInt(path.receiver_id),
        (ColumnSource::RaySourceId, OutputRecord::Ray(path)) => Value::BigInt(path.source_id),
        (ColumnSource::RayGroundProfile, OutputRecord::Ray(path)) => Value::Text(path.ground_profile_json()?),
        (ColumnSource::RayLeq, OutputRecord::Ray(path)) => {
            Value::Real(clamp_level(energetic_sum_db(&path.attenuation), floor))
        }
        (ColumnSource::RayPeriod, OutputRecord::Ray(path)) => {
            path.period.map_or(Value::Null, |period| Value::Text(period.code().to_string()))
        }
        _ => Value::Null,
    };
    Ok(value)
}

/// Tables a run writes: requested level series in priority order, then rays.
#[must_use]
pub fn output_tables(config: &RunConfig) -> Vec<TableSpec> {
    let mut tables: Vec<TableSpec> = config
        .periods
        .requested()
        .into_iter()
        .map(|series| TableSpec::levels(config, series))
        .collect();
    if config.export_rays == ExportRaysMode::ToTable {
        tables.push(TableSpec::rays(config));
    }
    tables
}
