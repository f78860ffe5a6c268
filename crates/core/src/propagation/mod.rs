//! Path search between sources and receivers.
//!
//! The search itself sits behind [`PathFinder`] and the per-band attenuation
//! of a path behind [`AttenuationModel`], so a full propagation standard can
//! be plugged in. The engine fans receivers out over a worker pool and hands
//! the paths to a [`PathVisitor`] per thread.

pub mod attenuation;
pub mod engine;
pub mod finder;
pub mod path;

pub use attenuation::{AttenuationModel, GeometricDivergence};
pub use engine::{PathVisitorFactory, PropagationEngine};
pub use finder::{DirectPathFinder, PathFinder, PathVisitor};
pub use path::{ProfilePoint, PropagationPath};
