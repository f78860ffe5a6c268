//! Vector type alias for 3D positions.

use nalgebra::Vector3;

/// 3D vector type for receiver, source and path vertex positions.
///
/// This is a simple alias for `nalgebra::Vector3<f64>`. Coordinates are
/// projected metres, `z` is the absolute elevation.
pub type Vec3 = Vector3<f64>;
