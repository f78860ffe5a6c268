//! Receiver level records.

use serde::{Deserialize, Serialize};

use crate::core_types::{
    a_weighted_level, clamp_level, power_to_db, unweighted_level, FrequencyBand, Vec3,
};

/// Levels of one receiver for one output series.
///
/// Every level is finite: values that would be infinite or NaN are replaced by
/// the configured floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverLevelRecord {
    pub receiver_id: i64,
    /// Contributing source when sources are not merged.
    pub source_id: Option<i64>,
    pub position: Option<Vec3>,
    /// Level per band, dB.
    pub levels: Vec<f64>,
    /// A-weighted equivalent level, dB(A).
    pub laeq: f64,
    /// Unweighted equivalent level, dB.
    pub leq: f64,
}

impl ReceiverLevelRecord {
    /// Build a record from per-band linear power.
    ///
    /// # Arguments
    /// * `power` - Linear power per band, aligned with `bands`
    /// * `floor` - Level substituted for non-finite values
    #[must_use]
    pub fn from_power(
        receiver_id: i64,
        source_id: Option<i64>,
        position: Option<Vec3>,
        power: &[f64],
        bands: &[FrequencyBand],
        floor: f64,
    ) -> Self {
        Self {
            receiver_id,
            source_id,
            position,
            levels: power
                .iter()
                .map(|&p| clamp_level(power_to_db(p), floor))
                .collect(),
            laeq: clamp_level(a_weighted_level(power, bands), floor),
            leq: clamp_level(unweighted_level(power), floor),
        }
    }
}
