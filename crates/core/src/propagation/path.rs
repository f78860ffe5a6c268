//! Propagation paths between one source and one receiver.

use serde::{Deserialize, Serialize};

use crate::config::TimePeriod;
use crate::core_types::Vec3;

/// One sample of the ground crossed by a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// Horizontal distance from the source, metres.
    pub distance: f64,
    /// Ground elevation, `None` without elevation data.
    pub ground_z: Option<f64>,
    /// Ground absorption coefficient G in `[0, 1]`.
    pub g: f64,
}

/// A sound path found by a [`PathFinder`](super::PathFinder).
///
/// `attenuation` and `period` are filled by the aggregator on the copies it
/// exports; paths coming out of a finder leave them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationPath {
    pub source_id: i64,
    pub receiver_id: i64,
    /// Index of the source in its scene.
    pub source_index: usize,
    /// Vertices from the emission point to the receiver.
    pub points: Vec<Vec3>,
    /// Level offset of the emission point relative to the source spectrum, dB.
    pub source_offset_db: f64,
    /// Number of reflections along the path.
    pub reflection_order: u32,
    /// Ground samples along the path, empty unless requested.
    pub ground_profile: Vec<ProfilePoint>,
    pub period: Option<TimePeriod>,
    /// Per-band attenuation in dB for `period`.
    pub attenuation: Vec<f64>,
}

impl PropagationPath {
    /// Direct path through `points`.
    #[must_use]
    pub fn new(source_id: i64, receiver_id: i64, source_index: usize, points: Vec<Vec3>) -> Self {
        Self {
            source_id,
            receiver_id,
            source_index,
            points,
            source_offset_db: 0.0,
            reflection_order: 0,
            ground_profile: Vec::new(),
            period: None,
            attenuation: Vec::new(),
        }
    }

    /// Length along all segments, metres.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).norm())
            .sum()
    }

    /// Straight-line distance between the first and last vertex.
    #[must_use]
    pub fn direct_distance(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (last - first).norm(),
            _ => 0.0,
        }
    }

    /// Ground profile as JSON, the content of the rays PATH column.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn ground_profile_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.ground_profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_path_lengths() {
        let path = PropagationPath::new(
            1,
            2,
            0,
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(3.0, 4.0, 0.0),
                Vec3::new(3.0, 4.0, 12.0),
            ],
        );
        assert_relative_eq!(path.length(), 17.0);
        assert_relative_eq!(path.direct_distance(), 13.0);
    }

    #[test]
    fn test_ground_profile_json() {
        let mut path = PropagationPath::new(1, 2, 0, Vec::new());
        path.ground_profile.push(ProfilePoint {
            distance: 5.0,
            ground_z: None,
            g: 0.5,
        });
        let json = path.ground_profile_json().expect("serializable");
        assert_eq!(json, r#"[{"distance":5.0,"ground_z":null,"g":0.5}]"#);
    }
}
