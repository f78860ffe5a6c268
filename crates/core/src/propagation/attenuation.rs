//! Attenuation along a path.
//!
//! [`AttenuationModel`] is where a full propagation standard plugs in.
//! [`GeometricDivergence`] covers spherical spreading and air absorption only.

use crate::config::PeriodSettings;
use crate::core_types::{FrequencyBand, OCTAVE_NOMINALS};

use super::path::PropagationPath;

/// Atmospheric absorption in dB/km at 15 °C and 70 % relative humidity, per
/// octave band from 63 Hz to 8 kHz.
const OCTAVE_ABSORPTION_DB_PER_KM: [f64; 8] = [0.1, 0.4, 1.0, 1.9, 3.7, 9.7, 32.8, 117.0];

/// Per-band attenuation of a path, in dB (negative values attenuate).
pub trait AttenuationModel: Send + Sync {
    fn attenuation(
        &self,
        path: &PropagationPath,
        settings: &PeriodSettings,
        bands: &[FrequencyBand],
    ) -> Vec<f64>;
}

/// `-(20·log10(d) + 11 + α·d/1000)` with `d` the path length, at least 1 m.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometricDivergence;

impl GeometricDivergence {
    /// Absorption of the octave band closest to `band`, in dB/km.
    #[must_use]
    pub fn standard_absorption(band: &FrequencyBand) -> f64 {
        let log_frequency = f64::from(band.nominal).log2();
        OCTAVE_NOMINALS
            .iter()
            .zip(OCTAVE_ABSORPTION_DB_PER_KM)
            .min_by(|(a, _), (b, _)| {
                let da = (f64::from(**a).log2() - log_frequency).abs();
                let db = (f64::from(**b).log2() - log_frequency).abs();
                da.total_cmp(&db)
            })
            .map_or(0.0, |(_, alpha)| alpha)
    }
}

impl AttenuationModel for GeometricDivergence {
    fn attenuation(
        &self,
        path: &PropagationPath,
        settings: &PeriodSettings,
        bands: &[FrequencyBand],
    ) -> Vec<f64> {
        let distance = path.length().max(1.0);
        let divergence = 20.0 * distance.log10() + 11.0;
        bands
            .iter()
            .enumerate()
            .map(|(k, band)| {
                let alpha = settings
                    .absorption_db_per_km
                    .get(k)
                    .copied()
                    .unwrap_or_else(|| Self::standard_absorption(band));
                -(divergence + alpha * distance / 1000.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{octave_bands, Vec3};
    use approx::assert_relative_eq;

    fn path(length: f64) -> PropagationPath {
        PropagationPath::new(1, 1, 0, vec![Vec3::zeros(), Vec3::new(length, 0.0, 0.0)])
    }

    #[test]
    fn test_divergence_at_100m() {
        let bands = octave_bands();
        let att = GeometricDivergence.attenuation(&path(100.0), &PeriodSettings::default(), &bands);
        assert_eq!(att.len(), 8);
        assert_relative_eq!(att[0], -(40.0 + 11.0 + 0.01), epsilon = 1e-9);
        assert_relative_eq!(att[7], -(40.0 + 11.0 + 11.7), epsilon = 1e-9);
    }

    #[test]
    fn test_custom_absorption_and_minimum_distance() {
        let bands = octave_bands();
        let settings = PeriodSettings {
            absorption_db_per_km: vec![0.0; 8],
            ..PeriodSettings::default()
        };
        let att = GeometricDivergence.attenuation(&path(0.0), &settings, &bands);
        assert!(att.iter().all(|&a| (a + 11.0).abs() < 1e-12));
    }

    #[test]
    fn test_third_octave_uses_nearest_octave() {
        let band = FrequencyBand::from_nominal(1250).unwrap();
        assert_relative_eq!(GeometricDivergence::standard_absorption(&band), 3.7);
    }
}
