//! Core types and utilities

pub mod acoustics;
pub mod envelope;
pub mod geometry;
pub mod vec3;

// Re-export
pub use acoustics::*;
pub use envelope::Envelope;
pub use geometry::{check_polygon, clip_polygon, polygon_wkt, Coordinate3, SourceGeometry};
pub use vec3::Vec3;
