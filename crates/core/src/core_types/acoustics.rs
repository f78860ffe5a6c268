//! Decibel arithmetic and frequency band tables.
//!
//! Levels travel through the pipeline as linear power so that contributions can
//! be summed. Conversion back to decibels only happens when a record is built.

use serde::{Deserialize, Serialize};

/// Convert a level in dB to linear power.
#[must_use]
pub fn db_to_power(db: f64) -> f64 {
    10.0_f64.powf(db / 10.0)
}

/// Convert linear power to a level in dB.
///
/// Zero power gives negative infinity.
#[must_use]
pub fn power_to_db(power: f64) -> f64 {
    10.0 * power.log10()
}

/// Element-wise [`db_to_power`].
#[must_use]
pub fn db_to_power_bands(levels: &[f64]) -> Vec<f64> {
    levels.iter().copied().map(db_to_power).collect()
}

/// Element-wise [`power_to_db`].
#[must_use]
pub fn power_to_db_bands(powers: &[f64]) -> Vec<f64> {
    powers.iter().copied().map(power_to_db).collect()
}

/// Add `other` into `acc` band by band.
pub fn add_power_bands(acc: &mut [f64], other: &[f64]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}

/// Energetic sum of dB levels.
#[must_use]
pub fn energetic_sum_db(levels: &[f64]) -> f64 {
    power_to_db(levels.iter().copied().map(db_to_power).sum())
}

/// Replace non-finite levels with `floor`.
#[must_use]
pub fn clamp_level(level: f64, floor: f64) -> f64 {
    if level.is_finite() {
        level
    } else {
        floor
    }
}

/// Day-evening-night weighted power.
///
/// `(12·Ld + 4·Le·10^(5/10) + 8·Ln·10^(10/10)) / 24`, with the evening and
/// night penalties applied in the dB domain as the definition states.
#[must_use]
pub fn lden_power(day: f64, evening: f64, night: f64) -> f64 {
    (12.0 * day
        + 4.0 * db_to_power(power_to_db(evening) + 5.0)
        + 8.0 * db_to_power(power_to_db(night) + 10.0))
        / 24.0
}

/// [`lden_power`] applied to every band.
#[must_use]
pub fn lden_power_bands(day: &[f64], evening: &[f64], night: &[f64]) -> Vec<f64> {
    day.iter()
        .zip(evening)
        .zip(night)
        .map(|((&d, &e), &n)| lden_power(d, e, n))
        .collect()
}

// ============================================================================
// Frequency bands
// ============================================================================

/// One analysis band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    /// Nominal centre frequency in Hz, used in column names.
    pub nominal: u32,
    /// Exact base-10 centre frequency in Hz.
    pub exact: f64,
    /// A-weighting correction in dB.
    pub a_weighting: f64,
}

const fn band(nominal: u32, exact: f64, a_weighting: f64) -> FrequencyBand {
    FrequencyBand {
        nominal,
        exact,
        a_weighting,
    }
}

/// Third-octave bands from 50 Hz to 10 kHz.
pub const THIRD_OCTAVE_BANDS: [FrequencyBand; 24] = [
    band(50, 50.118_723_4, -30.2),
    band(63, 63.095_734_4, -26.2),
    band(80, 79.432_823_5, -22.5),
    band(100, 100.0, -19.1),
    band(125, 125.892_541, -16.1),
    band(160, 158.489_319, -13.4),
    band(200, 199.526_231, -10.9),
    band(250, 251.188_643, -8.6),
    band(315, 316.227_766, -6.6),
    band(400, 398.107_171, -4.8),
    band(500, 501.187_234, -3.2),
    band(630, 630.957_344, -1.9),
    band(800, 794.328_235, -0.8),
    band(1000, 1000.0, 0.0),
    band(1250, 1_258.925_41, 0.6),
    band(1600, 1_584.893_19, 1.0),
    band(2000, 1_995.262_31, 1.2),
    band(2500, 2_511.886_43, 1.3),
    band(3150, 3_162.277_66, 1.2),
    band(4000, 3_981.071_71, 1.0),
    band(5000, 5_011.872_34, 0.5),
    band(6300, 6_309.573_44, -0.1),
    band(8000, 7_943.282_35, -1.1),
    band(10000, 10_000.0, -2.5),
];

/// Nominal frequencies of the default octave bands.
pub const OCTAVE_NOMINALS: [u32; 8] = [63, 125, 250, 500, 1000, 2000, 4000, 8000];

impl FrequencyBand {
    /// Look a band up by nominal frequency.
    #[must_use]
    pub fn from_nominal(nominal: u32) -> Option<Self> {
        THIRD_OCTAVE_BANDS
            .iter()
            .find(|band| band.nominal == nominal)
            .copied()
    }
}

/// The eight octave bands from 63 Hz to 8 kHz.
#[must_use]
pub fn octave_bands() -> Vec<FrequencyBand> {
    OCTAVE_NOMINALS
        .iter()
        .filter_map(|&nominal| FrequencyBand::from_nominal(nominal))
        .collect()
}

/// A-weighted equivalent level of a power spectrum, in dB(A).
#[must_use]
pub fn a_weighted_level(powers: &[f64], bands: &[FrequencyBand]) -> f64 {
    let weighted: f64 = powers
        .iter()
        .zip(bands)
        .map(|(&p, band)| p * db_to_power(band.a_weighting))
        .sum();
    power_to_db(weighted)
}

/// Unweighted equivalent level of a power spectrum, in dB.
#[must_use]
pub fn unweighted_level(powers: &[f64]) -> f64 {
    power_to_db(powers.iter().sum())
}
