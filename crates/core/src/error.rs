//! Error taxonomy for noise map runs.
//!
//! Every failure a run can surface is a variant of [`NoiseMapError`]. The
//! sub-enums group failures by the layer that raises them so callers can match
//! on the broad category without caring about the details.
//!
//! Topology failures while clipping soil or building geometries are not errors:
//! they are logged and the offending geometry is skipped.

use thiserror::Error;

/// Top-level error returned by noise map operations.
#[derive(Debug, Error)]
pub enum NoiseMapError {
    /// Invalid run settings, rejected before any work starts.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Input tables do not provide what the run needs.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The result store refused a write or a key constraint.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The computation domain could not be derived.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// The run was canceled before all cells were processed.
    #[error("run aborted")]
    Aborted,

    /// The worker pool could not be created.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

/// Invalid [`RunConfig`](crate::config::RunConfig) values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// A distance or length must be strictly positive.
    #[error("'{name}' must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    /// Reflections cannot search further than propagation.
    #[error("max reflection distance {reflection} exceeds max propagation distance {propagation}")]
    ReflectionDistanceExceedsPropagation { reflection: f64, propagation: f64 },

    /// A count must be at least one.
    #[error("'{name}' must be at least 1")]
    ZeroCount { name: &'static str },

    /// No output period was requested.
    #[error("no output period selected")]
    NoPeriodSelected,

    /// Per-band absorption table length does not match the band count.
    #[error("period '{period}' has {actual} absorption values for {expected} bands")]
    AbsorptionBandMismatch {
        period: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Output table names must be distinct.
    #[error("duplicate output table name '{0}'")]
    DuplicateTableName(String),
}

/// Problems with the shape of the input tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The table has no primary key column.
    #[error("table '{table}' does not have a primary key")]
    MissingPrimaryKey { table: String },

    /// Two rows share the same primary key value.
    #[error("table '{table}' has more than one row with primary key {primary_key}")]
    DuplicatePrimaryKey { table: String, primary_key: i64 },

    /// A geometry of the table has no elevation.
    #[error("geometry of '{table}' row {primary_key} has no Z ordinate")]
    MissingZOrdinate { table: String, primary_key: i64 },

    /// The table has no geometry column.
    #[error("table '{table}' does not have a geometry column")]
    MissingGeometry { table: String },

    /// A required value column is missing.
    #[error("table '{table}' does not have column '{column}'")]
    MissingColumn { table: String, column: String },

    /// No emission column matched the expected naming pattern.
    #[error("no emission columns with prefix '{prefix}' found in '{table}'")]
    NoFrequencyBands { table: String, prefix: String },

    /// A frequency encoded in a column name is not a known band.
    #[error("column '{column}' refers to unknown frequency {frequency} Hz")]
    UnknownFrequency { column: String, frequency: u32 },
}

/// Failures raised by a [`ResultStore`](crate::store::ResultStore).
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Writing to the underlying sink failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The table already exists and was not dropped.
    #[error("table '{0}' already exists")]
    TableExists(String),

    /// A write targeted a table that was never created.
    #[error("table '{0}' does not exist")]
    UnknownTable(String),

    /// Applying a primary key found duplicate key values.
    #[error("duplicate primary key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    /// A row does not match the table layout.
    #[error("row has {actual} values, table '{table}' has {expected} columns")]
    RowShape {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// A ray could not be serialized.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other refusal from the store.
    #[error("store rejected the operation: {0}")]
    Rejected(String),
}

impl PersistenceError {
    /// Error for a lock poisoned by a panic in another thread.
    ///
    /// # Arguments
    /// * `lock_name` - The name of the lock that was poisoned
    #[must_use]
    pub fn lock_poisoned(lock_name: &str) -> Self {
        Self::Rejected(format!(
            "lock '{lock_name}' was poisoned by a panic in another thread"
        ))
    }
}

/// Failures while deriving the computation domain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    /// There are no receivers, so the domain is empty.
    #[error("receiver table is empty, computation envelope is undefined")]
    EmptyEnvelope,

    /// The propagation distance cannot size a grid.
    #[error("maximum propagation distance must be positive, got {0}")]
    NonPositiveDistance(f64),

    /// The required grid has more cells than a `usize` can count.
    #[error("grid subdivision exceeds {0} levels")]
    SubdivisionOverflow(u32),
}

/// A geometry operation failed on malformed input.
///
/// Logged and skipped, never propagated out of a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("topology failure on {geometry}: {reason}")]
pub struct TopologyError {
    /// WKT dump of the offending geometry.
    pub geometry: String,
    /// Short description of what went wrong.
    pub reason: String,
}

/// Result alias for noise map operations.
pub type Result<T> = std::result::Result<T, NoiseMapError>;
