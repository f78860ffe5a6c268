//! Source emission spectra.
//!
//! Emission is computed once per source and period when a scene is assembled.
//! [`TableSpectrumEmission`] reads sound power levels stored in columns named
//! `{prefix}{period}{frequency}`, e.g. `LWD500` for the day level at 500 Hz.

use crate::config::{PeriodSelection, TimePeriod};
use crate::core_types::{db_to_power, FrequencyBand};
use crate::error::SchemaError;
use crate::store::SourceRecord;

/// Computes the emission spectrum of a source.
pub trait EmissionModel: Send + Sync {
    /// Linear sound power per band of `source` during `period`.
    ///
    /// # Errors
    ///
    /// Fails when the source row lacks the attributes the model needs.
    fn emission(
        &self,
        source: &SourceRecord,
        table: &str,
        period: TimePeriod,
        bands: &[FrequencyBand],
    ) -> Result<Vec<f64>, SchemaError>;
}

/// Emission read from per-band sound power level columns, in dB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpectrumEmission {
    prefix: String,
}

impl TableSpectrumEmission {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Name of the column holding the level of `band` during `period`.
    #[must_use]
    pub fn column_name(&self, period: TimePeriod, band: &FrequencyBand) -> String {
        format!("{}{}{}", self.prefix, period.code(), band.nominal)
    }
}

impl Default for TableSpectrumEmission {
    fn default() -> Self {
        Self::new("LW")
    }
}

impl EmissionModel for TableSpectrumEmission {
    fn emission(
        &self,
        source: &SourceRecord,
        table: &str,
        period: TimePeriod,
        bands: &[FrequencyBand],
    ) -> Result<Vec<f64>, SchemaError> {
        bands
            .iter()
            .map(|band| {
                let column = self.column_name(period, band);
                source
                    .fields
                    .get(&column)
                    .map(|&level| db_to_power(level))
                    .ok_or_else(|| SchemaError::MissingColumn {
                        table: table.to_string(),
                        column,
                    })
            })
            .collect()
    }
}

/// Derive the analysis bands from the emission columns of the source table.
///
/// Columns of the first computed period are used: day when day or Lden is
/// requested, else evening, else night.
///
/// # Errors
///
/// [`SchemaError::NoFrequencyBands`] when no column matches, and
/// [`SchemaError::UnknownFrequency`] when a column names a frequency outside the
/// third-octave table.
pub fn discover_frequency_bands(
    field_names: &[String],
    table: &str,
    prefix: &str,
    periods: &PeriodSelection,
) -> Result<Vec<FrequencyBand>, SchemaError> {
    let period = if periods.day || periods.den {
        TimePeriod::Day
    } else if periods.evening {
        TimePeriod::Evening
    } else {
        TimePeriod::Night
    };
    let column_prefix = format!("{prefix}{}", period.code());

    let mut bands = Vec::new();
    for name in field_names {
        let Some(suffix) = name.strip_prefix(&column_prefix) else {
            continue;
        };
        let Ok(frequency) = suffix.parse::<u32>() else {
            continue;
        };
        let band = FrequencyBand::from_nominal(frequency).ok_or_else(|| {
            SchemaError::UnknownFrequency {
                column: name.clone(),
                frequency,
            }
        })?;
        bands.push(band);
    }
    if bands.is_empty() {
        return Err(SchemaError::NoFrequencyBands {
            table: table.to_string(),
            prefix: column_prefix,
        });
    }
    bands.sort_by_key(|band| band.nominal);
    bands.dedup_by_key(|band| band.nominal);
    Ok(bands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{octave_bands, Coordinate3, SourceGeometry};
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_discover_bands_from_day_columns() {
        let fields = names(&["PK", "LWD1000", "LWD63", "LWE63", "LWD500", "LWDX"]);
        let bands =
            discover_frequency_bands(&fields, "SOURCES", "LW", &PeriodSelection::default()).unwrap();
        let nominals: Vec<u32> = bands.iter().map(|b| b.nominal).collect();
        assert_eq!(nominals, vec![63, 500, 1000]);
    }

    #[test]
    fn test_discover_bands_evening_only() {
        let periods = PeriodSelection {
            evening: true,
            den: false,
            ..PeriodSelection::default()
        };
        let fields = names(&["LWD1000", "LWE125"]);
        let bands = discover_frequency_bands(&fields, "SOURCES", "LW", &periods).unwrap();
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].nominal, 125);
    }

    #[test]
    fn test_discover_bands_errors() {
        let none = discover_frequency_bands(&names(&["PK"]), "SOURCES", "LW", &PeriodSelection::default());
        assert!(matches!(none, Err(SchemaError::NoFrequencyBands { .. })));

        let unknown =
            discover_frequency_bands(&names(&["LWD1234"]), "SOURCES", "LW", &PeriodSelection::default());
        assert!(matches!(
            unknown,
            Err(SchemaError::UnknownFrequency { frequency: 1234, .. })
        ));
    }

    #[test]
    fn test_table_spectrum_emission() {
        let bands = octave_bands();
        let model = TableSpectrumEmission::default();
        let mut fields = BTreeMap::new();
        for band in &bands {
            fields.insert(model.column_name(TimePeriod::Night, band), 90.0);
        }
        let source = SourceRecord {
            id: 4,
            geometry: SourceGeometry::Point(Coordinate3::new(0.0, 0.0, 0.05)),
            fields,
        };
        let power = model
            .emission(&source, "SOURCES", TimePeriod::Night, &bands)
            .unwrap();
        assert_eq!(power.len(), 8);
        assert_relative_eq!(power[0], 1e9, max_relative = 1e-12);

        let missing = model.emission(&source, "SOURCES", TimePeriod::Day, &bands);
        assert_eq!(
            missing,
            Err(SchemaError::MissingColumn {
                table: "SOURCES".to_string(),
                column: "LWD63".to_string()
            })
        );
    }
}
