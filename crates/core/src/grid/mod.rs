//! Spatial decomposition of the computation domain

pub mod domain;
pub mod spatial;

// Re-export main types
pub use domain::*;
pub use spatial::SpatialIndex;
