//! Path search seam and a direct line-of-sight finder.

use tracing::trace;

use super::path::{ProfilePoint, PropagationPath};
use crate::config::RunConfig;
use crate::core_types::{power_to_db, Vec3};
use crate::scene::{Scene, SceneReceiver, SceneSource};

/// Receives the paths found for one receiver.
///
/// `on_paths` may be called any number of times for a receiver, then
/// `finalize_receiver` exactly once, by the engine, after the search.
pub trait PathVisitor {
    fn on_paths(&mut self, receiver: &SceneReceiver, source: &SceneSource, paths: Vec<PropagationPath>);

    /// No more paths will arrive for `receiver`.
    fn finalize_receiver(&mut self, receiver: &SceneReceiver);
}

/// Finds the propagation paths between a receiver and the scene's sources.
pub trait PathFinder: Send + Sync {
    fn find_paths(&self, scene: &Scene, receiver: &SceneReceiver, visitor: &mut dyn PathVisitor);
}

/// Direct paths only: one straight segment per (sub-)source, dropped when a
/// building blocks it.
///
/// Line sources are cut into pieces no longer than `line_step`; each piece
/// emits from its midpoint with its share of the source power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectPathFinder {
    pub line_step: f64,
    /// Ground samples per path, 0 to skip the ground profile.
    pub profile_samples: usize,
}

impl DirectPathFinder {
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            line_step: config.line_source_step,
            profile_samples: if config.export_ground_profile { 8 } else { 0 },
        }
    }

    /// Emission points of a source with their level offset in dB.
    fn emission_points(&self, source: &SceneSource) -> Vec<(Vec3, f64)> {
        if source.is_point() {
            return source.geometry.first().map(|p| (*p, 0.0)).into_iter().collect();
        }
        let mut points = Vec::new();
        for segment in source.geometry.windows(2) {
            let (a, b) = (segment[0], segment[1]);
            let length = (b - a).norm();
            if length <= 0.0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let pieces = ((length / self.line_step).ceil() as usize).max(1);
            let piece_length = length / pieces as f64;
            for k in 0..pieces {
                let t = (k as f64 + 0.5) / pieces as f64;
                points.push((a + (b - a) * t, power_to_db(piece_length)));
            }
        }
        points
    }

    fn ground_profile(&self, scene: &Scene, from: &Vec3, to: &Vec3) -> Vec<ProfilePoint> {
        if self.profile_samples == 0 {
            return Vec::new();
        }
        let horizontal = (to.xy() - from.xy()).norm();
        (0..=self.profile_samples)
            .map(|k| {
                let t = k as f64 / self.profile_samples as f64;
                let point = from + (to - from) * t;
                ProfilePoint {
                    distance: horizontal * t,
                    ground_z: scene.elevation_at(point.x, point.y),
                    g: scene.ground_factor_at(point.x, point.y),
                }
            })
            .collect()
    }
}

impl PathFinder for DirectPathFinder {
    fn find_paths(&self, scene: &Scene, receiver: &SceneReceiver, visitor: &mut dyn PathVisitor) {
        let max_distance = scene.limits.max_propagation_distance;
        let position = receiver.position;
        for index in scene.sources_near(position.x, position.y, max_distance) {
            let source = &scene.sources[index];
            let paths: Vec<PropagationPath> = self
                .emission_points(source)
                .into_iter()
                .filter(|(point, _)| (position.xy() - point.xy()).norm() <= max_distance)
                .filter(|(point, _)| !scene.is_obstructed(point, &position))
                .map(|(point, offset)| {
                    let mut path = PropagationPath::new(source.id, receiver.id, index, vec![point, position]);
                    path.source_offset_db = offset;
                    path.ground_profile = self.ground_profile(scene, &point, &position);
                    path
                })
                .collect();
            if !paths.is_empty() {
                trace!("{} paths from source {} to receiver {}", paths.len(), source.id, receiver.id);
                visitor.on_paths(receiver, source, paths);
            }
        }
    }
}
