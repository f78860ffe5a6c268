//! Per-receiver aggregation of propagation paths into level records.
//!
//! Paths arrive for one receiver at a time. Each path is turned into linear
//! power per band and per computed period (source power × path attenuation),
//! and kept until the receiver is finalized. Finalizing sums the powers, either
//! over all sources or per source, derives Lden from the three periods and
//! pushes one record per requested series to the result queue.

pub mod record;

use std::collections::BTreeMap;

pub use record::ReceiverLevelRecord;

pub use crate::core_types::{lden_power, lden_power_bands};

use crate::config::{ExportRaysMode, OutputSeries, PeriodValues, RunConfig, TimePeriod};
use crate::context::RunContext;
use crate::core_types::{add_power_bands, db_to_power};
use crate::progress::ProgressTracker;
use crate::propagation::{AttenuationModel, PathVisitor, PathVisitorFactory, PropagationPath};
use crate::scene::{Scene, SceneReceiver, SceneSource};

/// How contributions of several sources end up in the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceGrouping {
    /// One record per receiver, all sources summed.
    Merged,
    /// One record per receiver and contributing source.
    PerSource,
}

/// Output behaviour of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub grouping: SourceGrouping,
    pub rays: ExportRaysMode,
}

impl OutputMode {
    #[must_use]
    pub const fn from_config(config: &RunConfig) -> Self {
        Self {
            grouping: if config.merge_sources {
                SourceGrouping::Merged
            } else {
                SourceGrouping::PerSource
            },
            rays: config.export_rays,
        }
    }
}

/// Power received from one path, per computed period.
#[derive(Debug, Clone)]
struct Contribution {
    source_index: usize,
    source_id: i64,
    power: PeriodValues<Vec<f64>>,
}

/// [`PathVisitor`] turning the paths of each receiver into level records.
pub struct ReceiverAggregator<'a> {
    context: &'a RunContext,
    scene: &'a Scene,
    attenuation: &'a dyn AttenuationModel,
    progress: &'a ProgressTracker,
    mode: OutputMode,
    periods: Vec<TimePeriod>,
    series: Vec<OutputSeries>,
    contributions: Vec<Contribution>,
    rays: Vec<PropagationPath>,
    halted: bool,
}

impl<'a> ReceiverAggregator<'a> {
    #[must_use]
    pub fn new(
        context: &'a RunContext,
        scene: &'a Scene,
        attenuation: &'a dyn AttenuationModel,
        progress: &'a ProgressTracker,
    ) -> Self {
        let config = context.config();
        Self {
            context,
            scene,
            attenuation,
            progress,
            mode: OutputMode::from_config(config),
            periods: config.periods.computed_periods(),
            series: config.periods.requested(),
            contributions: Vec::new(),
            rays: Vec::new(),
            halted: false,
        }
    }

    /// True once a push was abandoned because the run was aborted.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    fn flush_rays(&mut self) {
        let rays = std::mem::take(&mut self.rays);
        match self.mode.rays {
            ExportRaysMode::None => {}
            ExportRaysMode::ToTable => {
                if !rays.is_empty() && !self.context.queue().push_rays(rays, self.progress) {
                    self.halted = true;
                }
            }
            ExportRaysMode::ToMemory => {
                let _ = self.context.keep_rays(rays);
            }
        }
    }

    /// Summed power per group key, sources in scene order.
    fn group_contributions(&mut self) -> BTreeMap<Option<i64>, PeriodValues<Vec<f64>>> {
        let band_count = self.scene.bands.len();
        let zeros = |periods: &[TimePeriod]| {
            let mut values = PeriodValues::<Vec<f64>>::default();
            for &period in periods {
                values.set(period, vec![0.0; band_count]);
            }
            values
        };

        let mut contributions = std::mem::take(&mut self.contributions);
        contributions.sort_by_key(|c| c.source_index);

        let mut groups = BTreeMap::new();
        if self.mode.grouping == SourceGrouping::Merged || contributions.is_empty() {
            groups.insert(None, zeros(&self.periods));
        }
        for contribution in contributions {
            let key = match self.mode.grouping {
                SourceGrouping::Merged => None,
                SourceGrouping::PerSource => Some(contribution.source_id),
            };
            let sum = groups.entry(key).or_insert_with(|| zeros(&self.periods));
            for &period in &self.periods {
                add_power_bands(sum.get_mut(period), contribution.power.get(period));
            }
        }
        groups
    }
}

impl PathVisitor for ReceiverAggregator<'_> {
    fn on_paths(&mut self, _receiver: &SceneReceiver, source: &SceneSource, paths: Vec<PropagationPath>) {
        if self.halted {
            return;
        }
        let settings = &self.context.config().period_settings;
        let export_rays = self.mode.rays != ExportRaysMode::None;
        for path in paths {
            let mut power = PeriodValues::<Vec<f64>>::default();
            for &period in &self.periods {
                let attenuation = self
                    .attenuation
                    .attenuation(&path, settings.get(period), &self.scene.bands);
                let emission = source.power.get(period);
                power.set(
                    period,
                    attenuation
                        .iter()
                        .zip(emission)
                        .map(|(&att, &lw)| lw * db_to_power(att + path.source_offset_db))
                        .collect(),
                );
                if export_rays {
                    let mut ray = path.clone();
                    ray.period = Some(period);
                    ray.attenuation = attenuation;
                    self.rays.push(ray);
                }
            }
            self.contributions.push(Contribution {
                source_index: path.source_index,
                source_id: source.id,
                power,
            });
        }
    }

    fn finalize_receiver(&mut self, receiver: &SceneReceiver) {
        if self.halted {
            self.contributions.clear();
            self.rays.clear();
            return;
        }
        self.flush_rays();

        let config = self.context.config();
        let floor = config.level_floor_db;
        let position = config.export_receiver_position.then_some(receiver.position);
        let bands = &self.scene.bands;
        let groups = self.group_contributions();

        for (source_id, power) in &groups {
            for &series in &self.series {
                let levels = match series.period() {
                    Some(period) => power.get(period).clone(),
                    None => lden_power_bands(&power.day, &power.evening, &power.night),
                };
                let record =
                    ReceiverLevelRecord::from_power(receiver.id, *source_id, position, &levels, bands, floor);
                if self.halted || !self.context.queue().push_level(series, record, self.progress) {
                    self.halted = true;
                    return;
                }
            }
        }
    }
}

/// Creates a [`ReceiverAggregator`] per worker thread.
pub struct AggregatorFactory<'a> {
    pub context: &'a RunContext,
    pub scene: &'a Scene,
    pub attenuation: &'a dyn AttenuationModel,
    pub progress: &'a ProgressTracker,
}

impl<'a> PathVisitorFactory for AggregatorFactory<'a> {
    type Visitor = ReceiverAggregator<'a>;

    fn create(&self) -> Self::Visitor {
        ReceiverAggregator::new(self.context, self.scene, self.attenuation, self.progress)
    }
}
