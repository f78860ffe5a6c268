//! Noise Map Core Library
//!
//! Computes road and industrial noise levels on large receiver sets by
//! splitting the domain into cells small enough to hold in memory.
//!
//! ## Pipeline
//!
//! - Domain grid sized from the receivers and the propagation distance
//! - Per-cell scene assembly (buildings, soil, elevation, sources, receivers)
//! - Parallel path search and per-band attenuation behind pluggable traits
//! - Day, evening, night and Lden aggregation per receiver
//! - Bounded result queue drained by a dedicated writer thread

// Core types and utilities
pub mod config;
pub mod core_types;
pub mod error;
pub mod profiler;
pub mod progress;

// Computation pipeline
pub mod aggregation;
pub mod context;
pub mod driver;
pub mod grid;
pub mod propagation;
pub mod scene;

// Input and output
pub mod output;
pub mod store;

// Re-export core types
pub use config::{
    ExportRaysMode, OutputSeries, PeriodSelection, PeriodSettings, PeriodValues, RunConfig,
    TableNames, TimePeriod,
};
pub use core_types::{Coordinate3, Envelope, FrequencyBand, SourceGeometry, Vec3};
pub use error::{NoiseMapError, Result};

// Re-export pipeline types
pub use aggregation::ReceiverLevelRecord;
pub use context::RunContext;
pub use driver::{NoiseMapRunner, RunSummary};
pub use grid::{CellIndex, DomainGrid};
pub use progress::ProgressTracker;
pub use propagation::{AttenuationModel, PathFinder, PropagationPath};
pub use scene::{EmissionModel, Scene};

// Re-export stores
pub use store::{InputStore, MemoryInputStore, MemoryResultStore, ResultStore, SqlScriptStore};
