//! Run configuration.
//!
//! [`RunConfig`] gathers every knob of a noise map run. It deserializes from a
//! partial JSON document, missing fields taking their default value.

use std::time::Duration;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::core_types::acoustics::{octave_bands, FrequencyBand};
use crate::error::ConfigurationError;

// ============================================================================
// Periods and output series
// ============================================================================

/// Time period with its own emission and meteorology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimePeriod {
    Day,
    Evening,
    Night,
}

impl TimePeriod {
    /// All periods in chronological order.
    pub const ALL: [Self; 3] = [Self::Day, Self::Evening, Self::Night];

    /// One-letter code used in column names and the rays PERIOD column.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Day => "D",
            Self::Evening => "E",
            Self::Night => "N",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Day => 0,
            Self::Evening => 1,
            Self::Night => 2,
        }
    }
}

/// A stream of output records, one result table each.
///
/// Declaration order is the writer's drain priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputSeries {
    Day,
    Evening,
    Night,
    Den,
    Rays,
}

impl OutputSeries {
    /// Level series in priority order.
    pub const LEVELS: [Self; 4] = [Self::Day, Self::Evening, Self::Night, Self::Den];

    /// The period backing a single-period series.
    #[must_use]
    pub const fn period(self) -> Option<TimePeriod> {
        match self {
            Self::Day => Some(TimePeriod::Day),
            Self::Evening => Some(TimePeriod::Evening),
            Self::Night => Some(TimePeriod::Night),
            Self::Den | Self::Rays => None,
        }
    }
}

/// Values kept separately for the day, evening and night periods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodValues<T> {
    pub day: T,
    pub evening: T,
    pub night: T,
}

impl<T> PeriodValues<T> {
    pub fn from_fn(mut f: impl FnMut(TimePeriod) -> T) -> Self {
        Self {
            day: f(TimePeriod::Day),
            evening: f(TimePeriod::Evening),
            night: f(TimePeriod::Night),
        }
    }

    #[must_use]
    pub const fn get(&self, period: TimePeriod) -> &T {
        match period {
            TimePeriod::Day => &self.day,
            TimePeriod::Evening => &self.evening,
            TimePeriod::Night => &self.night,
        }
    }

    pub fn get_mut(&mut self, period: TimePeriod) -> &mut T {
        match period {
            TimePeriod::Day => &mut self.day,
            TimePeriod::Evening => &mut self.evening,
            TimePeriod::Night => &mut self.night,
        }
    }

    /// Replace the value of one period, leaving the others untouched.
    pub fn set(&mut self, period: TimePeriod, value: T) {
        *self.get_mut(period) = value;
    }
}

/// Which level tables a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodSelection {
    pub day: bool,
    pub evening: bool,
    pub night: bool,
    pub den: bool,
}

impl Default for PeriodSelection {
    fn default() -> Self {
        Self {
            day: false,
            evening: false,
            night: false,
            den: true,
        }
    }
}

impl PeriodSelection {
    /// Every level table.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            day: true,
            evening: true,
            night: true,
            den: true,
        }
    }

    #[must_use]
    pub const fn any(&self) -> bool {
        self.day || self.evening || self.night || self.den
    }

    /// Requested level series in priority order.
    #[must_use]
    pub fn requested(&self) -> Vec<OutputSeries> {
        OutputSeries::LEVELS
            .into_iter()
            .filter(|series| self.is_requested(*series))
            .collect()
    }

    #[must_use]
    pub const fn is_requested(&self, series: OutputSeries) -> bool {
        match series {
            OutputSeries::Day => self.day,
            OutputSeries::Evening => self.evening,
            OutputSeries::Night => self.night,
            OutputSeries::Den => self.den,
            OutputSeries::Rays => false,
        }
    }

    /// Periods whose attenuation must be computed. Lden needs all three.
    #[must_use]
    pub fn computed_periods(&self) -> Vec<TimePeriod> {
        TimePeriod::ALL
            .into_iter()
            .filter(|period| {
                self.den
                    || match period {
                        TimePeriod::Day => self.day,
                        TimePeriod::Evening => self.evening,
                        TimePeriod::Night => self.night,
                    }
            })
            .collect()
    }
}

// ============================================================================
// Per-period propagation settings
// ============================================================================

/// Meteorological conditions of one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodSettings {
    /// Air temperature in degrees Celsius.
    pub temperature_celsius: f64,
    /// Relative humidity in percent.
    pub relative_humidity: f64,
    /// Probability of downward-refracting conditions, 0..=1.
    pub favourable_occurrence: f64,
    /// Per-band atmospheric absorption in dB/km. Empty uses the standard table.
    pub absorption_db_per_km: Vec<f64>,
}

impl Default for PeriodSettings {
    fn default() -> Self {
        Self {
            temperature_celsius: 15.0,
            relative_humidity: 70.0,
            favourable_occurrence: 0.5,
            absorption_db_per_km: Vec::new(),
        }
    }
}

/// Independent settings for day, evening and night.
pub type PeriodSettingsSet = PeriodValues<PeriodSettings>;

// ============================================================================
// Output naming and rays
// ============================================================================

/// What happens to propagation paths once aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportRaysMode {
    /// Paths are discarded.
    #[default]
    None,
    /// Paths are written to the rays table.
    ToTable,
    /// Paths are kept in memory and returned with the run summary.
    ToMemory,
}

/// Result table names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub day: String,
    pub evening: String,
    pub night: String,
    pub den: String,
    pub rays: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            day: "LDAY_RESULT".to_string(),
            evening: "LEVENING_RESULT".to_string(),
            night: "LNIGHT_RESULT".to_string(),
            den: "LDEN_RESULT".to_string(),
            rays: "RAYS".to_string(),
        }
    }
}

impl TableNames {
    #[must_use]
    pub fn for_series(&self, series: OutputSeries) -> &str {
        match series {
            OutputSeries::Day => &self.day,
            OutputSeries::Evening => &self.evening,
            OutputSeries::Night => &self.night,
            OutputSeries::Den => &self.den,
            OutputSeries::Rays => &self.rays,
        }
    }
}

// ============================================================================
// Run configuration
// ============================================================================

/// Settings of a noise map run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Analysis bands. Empty means discover them from the source table columns.
    pub frequency_bands: Vec<FrequencyBand>,
    pub periods: PeriodSelection,
    /// One record per receiver when true, one per (receiver, source) otherwise.
    pub merge_sources: bool,
    /// Level tables only carry the A-weighted level.
    pub compute_laeq_only: bool,
    pub export_receiver_position: bool,
    pub reflection_order: u32,
    /// Metres.
    pub max_propagation_distance: f64,
    /// Metres.
    pub max_reflection_distance: f64,
    /// Minimum ratio of propagation distance to cell size.
    pub minimal_buffer_ratio: f64,
    /// Side of the square tiles soil areas are split into, metres.
    pub ground_split_side_length: f64,
    /// Sub-source spacing used to discretise line sources, metres.
    pub line_source_step: f64,
    /// Queue size above which producers wait.
    pub output_maximum_queue: usize,
    /// Maximum rows per insert.
    pub writer_batch_size: usize,
    pub backpressure_poll_ms: u64,
    pub writer_idle_sleep_ms: u64,
    pub export_rays: ExportRaysMode,
    /// Rays kept at most, 0 for no limit.
    pub maximum_rays_output_count: u64,
    /// Add the ground profile JSON column to the rays table.
    pub export_ground_profile: bool,
    /// Add the `LEQ` and `PERIOD` columns to the rays table.
    pub export_ray_levels: bool,
    /// Worker threads, 0 for one per core.
    pub thread_count: usize,
    pub drop_existing_tables: bool,
    /// Level written in place of non-finite values, dB.
    pub level_floor_db: f64,
    /// Wall absorption used when a building has no own value.
    pub wall_absorption: f64,
    pub period_settings: PeriodSettingsSet,
    pub table_names: TableNames,
    /// Prefix of the source emission columns, e.g. `LWD500`.
    pub lw_column_prefix: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frequency_bands: octave_bands(),
            periods: PeriodSelection::default(),
            merge_sources: true,
            compute_laeq_only: false,
            export_receiver_position: false,
            reflection_order: 1,
            max_propagation_distance: 750.0,
            max_reflection_distance: 100.0,
            minimal_buffer_ratio: 0.3,
            ground_split_side_length: 200.0,
            line_source_step: 10.0,
            output_maximum_queue: 50_000,
            writer_batch_size: 500,
            backpressure_poll_ms: 10,
            writer_idle_sleep_ms: 50,
            export_rays: ExportRaysMode::None,
            maximum_rays_output_count: 0,
            export_ground_profile: false,
            export_ray_levels: true,
            thread_count: 0,
            drop_existing_tables: true,
            level_floor_db: -99.0,
            wall_absorption: 0.1,
            period_settings: PeriodSettingsSet::default(),
            table_names: TableNames::default(),
            lw_column_prefix: "LW".to_string(),
        }
    }
}

impl RunConfig {
    #[must_use]
    pub const fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }

    #[must_use]
    pub const fn writer_idle_sleep(&self) -> Duration {
        Duration::from_millis(self.writer_idle_sleep_ms)
    }

    /// Fetch margin for obstacles around a cell: propagation plus two reflections.
    #[must_use]
    pub fn obstruction_margin(&self) -> f64 {
        self.max_propagation_distance + 2.0 * self.max_reflection_distance
    }

    /// Check the settings before a run.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("max_propagation_distance", self.max_propagation_distance),
            ("minimal_buffer_ratio", self.minimal_buffer_ratio),
            ("ground_split_side_length", self.ground_split_side_length),
            ("line_source_step", self.line_source_step),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigurationError::NonPositive { name, value });
            }
        }
        if self.max_reflection_distance.is_nan() || self.max_reflection_distance < 0.0 {
            return Err(ConfigurationError::NonPositive {
                name: "max_reflection_distance",
                value: self.max_reflection_distance,
            });
        }
        if self.max_reflection_distance > self.max_propagation_distance {
            return Err(ConfigurationError::ReflectionDistanceExceedsPropagation {
                reflection: self.max_reflection_distance,
                propagation: self.max_propagation_distance,
            });
        }
        if self.output_maximum_queue == 0 {
            return Err(ConfigurationError::ZeroCount {
                name: "output_maximum_queue",
            });
        }
        if self.writer_batch_size == 0 {
            return Err(ConfigurationError::ZeroCount {
                name: "writer_batch_size",
            });
        }
        if !self.periods.any() {
            return Err(ConfigurationError::NoPeriodSelected);
        }
        if !self.frequency_bands.is_empty() {
            for period in TimePeriod::ALL {
                let absorption = &self.period_settings.get(period).absorption_db_per_km;
                if !absorption.is_empty() && absorption.len() != self.frequency_bands.len() {
                    return Err(ConfigurationError::AbsorptionBandMismatch {
                        period: period.code(),
                        expected: self.frequency_bands.len(),
                        actual: absorption.len(),
                    });
                }
            }
        }
        let mut names = FxHashSet::default();
        for series in OutputSeries::LEVELS.into_iter().chain([OutputSeries::Rays]) {
            let name = self.table_names.for_series(series);
            if !names.insert(name.to_ascii_uppercase()) {
                return Err(ConfigurationError::DuplicateTableName(name.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frequency_bands.len(), 8);
        assert_eq!(config.periods.requested(), vec![OutputSeries::Den]);
        assert_eq!(config.obstruction_margin(), 950.0);
    }

    #[test]
    fn test_den_computes_every_period() {
        let den = PeriodSelection::default();
        assert_eq!(den.computed_periods(), TimePeriod::ALL.to_vec());

        let night_only = PeriodSelection {
            night: true,
            den: false,
            ..PeriodSelection::default()
        };
        assert_eq!(night_only.computed_periods(), vec![TimePeriod::Night]);
        assert_eq!(night_only.requested(), vec![OutputSeries::Night]);
    }

    #[test]
    fn test_period_settings_are_independent() {
        let mut settings = PeriodSettingsSet::default();
        let warm = PeriodSettings {
            temperature_celsius: 25.0,
            ..PeriodSettings::default()
        };
        let cold = PeriodSettings {
            temperature_celsius: 5.0,
            ..PeriodSettings::default()
        };
        settings.set(TimePeriod::Day, warm.clone());
        settings.set(TimePeriod::Night, cold.clone());

        assert_eq!(settings.get(TimePeriod::Day), &warm);
        assert_eq!(settings.get(TimePeriod::Evening), &PeriodSettings::default());
        assert_eq!(settings.get(TimePeriod::Night), &cold);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RunConfig {
            max_propagation_distance: 0.0,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::NonPositive {
                name: "max_propagation_distance",
                ..
            })
        ));

        let config = RunConfig {
            periods: PeriodSelection {
                day: false,
                evening: false,
                night: false,
                den: false,
            },
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigurationError::NoPeriodSelected));

        let config = RunConfig {
            max_reflection_distance: 800.0,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ReflectionDistanceExceedsPropagation { .. })
        ));

        let config = RunConfig {
            writer_batch_size: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.table_names.rays = "lden_result".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::DuplicateTableName(_))
        ));
    }

    #[test]
    fn test_partial_json() {
        let config: RunConfig =
            serde_json::from_str(r#"{ "merge_sources": false, "periods": { "day": true } }"#)
                .unwrap();
        assert!(!config.merge_sources);
        assert!(config.periods.day);
        assert!(config.periods.den);
        assert_eq!(config.max_propagation_distance, 750.0);
    }
}
