//! Parallel path search over the receivers of one scene.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::finder::{PathFinder, PathVisitor};
use crate::context::RunFlags;
use crate::error::NoiseMapError;
use crate::progress::ProgressTracker;
use crate::scene::Scene;

/// Creates one visitor per worker thread.
pub trait PathVisitorFactory: Sync {
    type Visitor: PathVisitor + Send;

    fn create(&self) -> Self::Visitor;
}

/// Runs a [`PathFinder`] for every receiver of a scene on a fixed pool.
#[derive(Debug)]
pub struct PropagationEngine {
    pool: ThreadPool,
}

impl PropagationEngine {
    /// # Arguments
    /// * `thread_count` - Worker threads, 0 for one per available core
    ///
    /// # Errors
    ///
    /// [`NoiseMapError::ThreadPool`] when the pool cannot be built.
    pub fn new(thread_count: usize) -> Result<Self, NoiseMapError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .thread_name(|k| format!("propagation-{k}"))
            .build()
            .map_err(|err| NoiseMapError::ThreadPool(err.to_string()))?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Search paths for every receiver of `scene`.
    ///
    /// Receivers not started when the run is aborted or `progress` is
    /// canceled are skipped. Each finished receiver ends one step of
    /// `progress`.
    ///
    /// # Errors
    ///
    /// [`NoiseMapError::Aborted`] when receivers were skipped.
    pub fn run<F: PathVisitorFactory>(
        &self,
        scene: &Scene,
        finder: &dyn PathFinder,
        factory: &F,
        progress: &ProgressTracker,
        flags: &RunFlags,
    ) -> Result<(), NoiseMapError> {
        self.pool.install(|| {
            scene
                .receivers
                .par_iter()
                .for_each_init(|| factory.create(), |visitor, receiver| {
                    if flags.is_aborted() || progress.is_canceled() {
                        return;
                    }
                    finder.find_paths(scene, receiver, &mut *visitor);
                    visitor.finalize_receiver(receiver);
                    progress.end_step();
                });
        });
        if flags.is_aborted() || progress.is_canceled() {
            return Err(NoiseMapError::Aborted);
        }
        Ok(())
    }
}
