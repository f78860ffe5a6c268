//! End-to-end noise map computation.
//!
//! A run sizes the domain grid from the receivers, starts the result writer,
//! then visits the populated cells in order: assemble the cell scene, search
//! paths for its receivers on the worker pool, aggregate into level records.
//! The writer applies the table keys once every cell is done.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::aggregation::AggregatorFactory;
use crate::config::{ExportRaysMode, RunConfig};
use crate::context::RunContext;
use crate::core_types::{Envelope, FrequencyBand};
use crate::error::{DomainError, NoiseMapError};
use crate::grid::DomainGrid;
use crate::output::{ResultWriter, WriterHandle};
use crate::profiler::{CellTimer, ProfilerScope};
use crate::progress::ProgressTracker;
use crate::propagation::{
    AttenuationModel, DirectPathFinder, GeometricDivergence, PathFinder, PropagationEngine,
    PropagationPath,
};
use crate::scene::{discover_frequency_bands, EmissionModel, SceneAssembler, TableSpectrumEmission};
use crate::store::{InputStore, ResultStore};

/// Outcome of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub grid_dim: usize,
    /// Cells holding at least one receiver.
    pub cells_processed: usize,
    pub receivers_processed: usize,
    pub rows_written: usize,
    pub rows_per_table: BTreeMap<String, usize>,
    /// Bands the levels were computed on.
    pub bands: Vec<FrequencyBand>,
    /// Paths kept when rays are exported to memory.
    pub rays: Vec<PropagationPath>,
    pub cell_time: CellTimer,
}

/// Runs a noise map computation with pluggable propagation models.
pub struct NoiseMapRunner {
    config: RunConfig,
    path_finder: Box<dyn PathFinder>,
    attenuation: Box<dyn AttenuationModel>,
    emission: Box<dyn EmissionModel>,
}

impl NoiseMapRunner {
    /// Runner with direct paths, geometric divergence and tabulated emission.
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        let path_finder = Box::new(DirectPathFinder::from_config(&config));
        let emission = Box::new(TableSpectrumEmission::new(config.lw_column_prefix.clone()));
        Self {
            config,
            path_finder,
            attenuation: Box::new(GeometricDivergence),
            emission,
        }
    }

    #[must_use]
    pub fn with_path_finder(mut self, path_finder: Box<dyn PathFinder>) -> Self {
        self.path_finder = path_finder;
        self
    }

    #[must_use]
    pub fn with_attenuation(mut self, attenuation: Box<dyn AttenuationModel>) -> Self {
        self.attenuation = attenuation;
        self
    }

    #[must_use]
    pub fn with_emission(mut self, emission: Box<dyn EmissionModel>) -> Self {
        self.emission = emission;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Compute the noise map of `input` into `results`.
    ///
    /// # Errors
    ///
    /// See [`run_with_progress`](Self::run_with_progress).
    pub fn run(
        &self,
        input: &dyn InputStore,
        results: Box<dyn ResultStore>,
    ) -> Result<RunSummary, NoiseMapError> {
        let progress = ProgressTracker::logging_root(1, Duration::from_secs(10));
        self.run_with_progress(input, results, &progress)
    }

    /// Compute the noise map of `input` into `results`, reporting on `progress`.
    ///
    /// Canceling `progress` stops the run after the receivers in flight.
    ///
    /// # Errors
    ///
    /// - [`NoiseMapError::Configuration`] for invalid settings
    /// - [`NoiseMapError::Schema`] when an input table lacks a key, geometry,
    ///   elevation or emission column
    /// - [`NoiseMapError::Domain`] when there are no receivers
    /// - [`NoiseMapError::Persistence`] when the result store fails
    /// - [`NoiseMapError::Aborted`] when the run was canceled
    pub fn run_with_progress(
        &self,
        input: &dyn InputStore,
        results: Box<dyn ResultStore>,
        progress: &ProgressTracker,
    ) -> Result<RunSummary, NoiseMapError> {
        self.config.validate()?;
        let config = self.resolve_bands(input)?;
        config.validate()?;

        let positions = input.receiver_positions()?;
        let envelope = computation_envelope(&positions, config.max_propagation_distance)?;
        let grid = DomainGrid::new(
            envelope,
            config.max_propagation_distance,
            config.minimal_buffer_ratio,
        )?;
        let cells = grid.populated_cells(positions.iter().copied());
        info!(
            "Computation domain {:.0} x {:.0} m split in {} x {} cells, {} populated",
            envelope.width(),
            envelope.height(),
            grid.grid_dim(),
            grid.grid_dim(),
            cells.len()
        );

        let engine = PropagationEngine::new(config.thread_count)?;
        info!("Propagation on {} threads", engine.thread_count());
        let bands = config.frequency_bands.clone();
        let context = Arc::new(RunContext::new(config));
        let writer = ResultWriter::start(results, Arc::clone(&context))?;

        let run_progress = progress.sub_process(cells.len());
        let assembler =
            SceneAssembler::new(context.config(), &grid, &bands, self.emission.as_ref());
        let mut cell_time = CellTimer::new();
        let cell_count = cells.len();
        for (k, (&cell, &receiver_count)) in cells.iter().enumerate() {
            if context.is_aborted() || progress.is_canceled() {
                return Err(abandon(writer, NoiseMapError::Aborted));
            }
            info!("Begin processing of cell {} / {}", k + 1, cell_count);
            let scope = ProfilerScope::new(format!("Cell ({}, {})", cell.i, cell.j));

            let scene = match assembler.assemble_cell(cell, input, &context) {
                Ok(scene) => scene,
                Err(err) => return Err(abandon(writer, err)),
            };
            if scene.receivers.len() < receiver_count {
                info!(
                    "{} receivers of cell ({}, {}) already processed",
                    receiver_count - scene.receivers.len(),
                    cell.i,
                    cell.j
                );
            }

            let cell_progress = run_progress.sub_process(scene.receivers.len());
            let factory = AggregatorFactory {
                context: &context,
                scene: &scene,
                attenuation: self.attenuation.as_ref(),
                progress: &cell_progress,
            };
            if let Err(err) = engine.run(
                &scene,
                self.path_finder.as_ref(),
                &factory,
                &cell_progress,
                context.flags(),
            ) {
                return Err(abandon(writer, err));
            }
            if scene.receivers.is_empty() {
                run_progress.end_step();
            } else {
                cell_progress.end_of_progress();
            }
            cell_time.record(scope.elapsed_ms());
        }

        let report = writer.stop()?;
        info!(
            "Computation done: {} receivers, {} rows written in {} batches, {:.1} ms per cell",
            context.processed_receiver_count(),
            report.rows_written,
            report.batches,
            cell_time.average_ms()
        );
        let rays = match context.config().export_rays {
            ExportRaysMode::ToMemory => context.take_rays_in_memory(),
            ExportRaysMode::None | ExportRaysMode::ToTable => Vec::new(),
        };
        Ok(RunSummary {
            grid_dim: grid.grid_dim(),
            cells_processed: cell_count,
            receivers_processed: context.processed_receiver_count(),
            rows_written: report.rows_written,
            rows_per_table: report.rows_per_table,
            bands,
            rays,
            cell_time,
        })
    }

    /// Run settings with the analysis bands filled in from the source table
    /// when none are configured.
    fn resolve_bands(&self, input: &dyn InputStore) -> Result<RunConfig, NoiseMapError> {
        let mut config = self.config.clone();
        if config.frequency_bands.is_empty() {
            config.frequency_bands = discover_frequency_bands(
                &input.source_field_names(),
                &input.sources_schema().name,
                &config.lw_column_prefix,
                &config.periods,
            )?;
            info!(
                "Found {} frequency bands in '{}'",
                config.frequency_bands.len(),
                input.sources_schema().name
            );
        }
        Ok(config)
    }
}

/// Receiver extent grown by the propagation distance.
///
/// # Errors
///
/// [`DomainError::EmptyEnvelope`] when there is no receiver.
pub fn computation_envelope(
    receivers: &[(f64, f64)],
    max_propagation_distance: f64,
) -> Result<Envelope, DomainError> {
    let envelope = Envelope::from_points(receivers.iter().copied());
    if envelope.is_null() {
        return Err(DomainError::EmptyEnvelope);
    }
    Ok(envelope.expand_by(max_propagation_distance))
}

/// Stop the writer after a failed cell. A writer failure takes precedence as
/// it is usually what aborted the run.
fn abandon(writer: WriterHandle, err: NoiseMapError) -> NoiseMapError {
    if let Err(writer_err @ NoiseMapError::Persistence(_)) = writer.cancel() {
        return writer_err;
    }
    if !matches!(err, NoiseMapError::Aborted) {
        warn!("Run stopped: {err}");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{octave_bands, Coordinate3, SourceGeometry};
    use crate::error::{ConfigurationError, SchemaError};
    use crate::store::{MemoryInputStore, MemoryResultStore, ReceiverRecord, SourceRecord, TableSchema};

    fn store(receivers: &[(i64, f64, f64)]) -> MemoryInputStore {
        let mut fields = BTreeMap::new();
        for band in octave_bands() {
            for period in ['D', 'E', 'N'] {
                fields.insert(format!("LW{period}{}", band.nominal), 90.0);
            }
        }
        MemoryInputStore::new()
            .with_receivers(
                TableSchema::keyed("RECEIVERS"),
                receivers
                    .iter()
                    .map(|&(id, x, y)| ReceiverRecord {
                        id,
                        position: Coordinate3::new(x, y, 4.0),
                    })
                    .collect(),
            )
            .with_sources(
                TableSchema::keyed("SOURCES"),
                vec![SourceRecord {
                    id: 1,
                    geometry: SourceGeometry::Point(Coordinate3::new(100.0, 100.0, 0.5)),
                    fields,
                }],
            )
    }

    #[test]
    fn test_computation_envelope() {
        let envelope = computation_envelope(&[(0.0, 0.0), (100.0, 50.0)], 10.0).unwrap();
        assert_eq!(envelope, Envelope::new(-10.0, -10.0, 110.0, 60.0));
        assert_eq!(computation_envelope(&[], 10.0), Err(DomainError::EmptyEnvelope));
    }

    #[test]
    fn test_run_without_receivers_fails() {
        let runner = NoiseMapRunner::new(RunConfig::default());
        let result = runner.run(&store(&[]), Box::new(MemoryResultStore::new()));
        assert!(matches!(
            result,
            Err(NoiseMapError::Domain(DomainError::EmptyEnvelope))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_writing() {
        let config = RunConfig {
            writer_batch_size: 0,
            ..RunConfig::default()
        };
        let results = MemoryResultStore::new();
        let result = NoiseMapRunner::new(config).run(&store(&[(1, 0.0, 0.0)]), Box::new(results.clone()));
        assert!(matches!(
            result,
            Err(NoiseMapError::Configuration(ConfigurationError::ZeroCount { .. }))
        ));
        assert!(results.table_names().is_empty());
    }

    #[test]
    fn test_duplicate_receivers_rejected_before_writing() {
        let results = MemoryResultStore::new();
        let result = NoiseMapRunner::new(RunConfig::default()).run(
            &store(&[(1, 90.0, 100.0), (1, 110.0, 100.0)]),
            Box::new(results.clone()),
        );
        assert!(matches!(
            result,
            Err(NoiseMapError::Schema(SchemaError::DuplicatePrimaryKey {
                primary_key: 1,
                ..
            }))
        ));
        assert!(results.table_names().is_empty());
    }

    #[test]
    fn test_bands_discovered_from_source_columns() {
        let config = RunConfig {
            frequency_bands: Vec::new(),
            ..RunConfig::default()
        };
        let summary = NoiseMapRunner::new(config)
            .run(&store(&[(1, 110.0, 100.0)]), Box::new(MemoryResultStore::new()))
            .unwrap();
        assert_eq!(summary.bands, octave_bands());
        assert_eq!(summary.receivers_processed, 1);
    }

    #[test]
    fn test_missing_emission_column_cancels_writer() {
        let config = RunConfig {
            lw_column_prefix: "PWL".to_string(),
            ..RunConfig::default()
        };
        let results = MemoryResultStore::new();
        let result =
            NoiseMapRunner::new(config).run(&store(&[(1, 110.0, 100.0)]), Box::new(results.clone()));
        assert!(matches!(
            result,
            Err(NoiseMapError::Schema(SchemaError::MissingColumn { .. }))
        ));
        assert!(results.is_finished());
    }
}
