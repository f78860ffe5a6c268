//! State shared by every component of one run.
//!
//! A [`RunContext`] is created when a run starts and dropped when it ends.
//! Nothing in it outlives the run, so two runs never see each other's
//! receivers or flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashSet;

use crate::config::RunConfig;
use crate::output::ResultQueue;
use crate::propagation::PropagationPath;

/// Cooperative stop flags read at every blocking point.
#[derive(Debug, Default)]
pub struct RunFlags {
    aborted: AtomicBool,
    exit_when_done: AtomicBool,
}

impl RunFlags {
    /// Stop producers and the writer as soon as they notice.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Let the writer exit once everything queued has been written.
    pub fn request_exit(&self) {
        self.exit_when_done.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.exit_when_done.load(Ordering::SeqCst)
    }
}

/// Per-run shared state.
#[derive(Debug)]
pub struct RunContext {
    config: RunConfig,
    processed_receivers: Mutex<FxHashSet<i64>>,
    flags: Arc<RunFlags>,
    queue: ResultQueue,
    rays_in_memory: Mutex<Vec<PropagationPath>>,
}

impl RunContext {
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        let flags = Arc::new(RunFlags::default());
        let queue = ResultQueue::new(&config, Arc::clone(&flags));
        Self {
            config,
            processed_receivers: Mutex::new(FxHashSet::default()),
            flags,
            queue,
            rays_in_memory: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub const fn queue(&self) -> &ResultQueue {
        &self.queue
    }

    #[must_use]
    pub fn flags(&self) -> &Arc<RunFlags> {
        &self.flags
    }

    /// Claim a receiver for processing.
    ///
    /// Returns `false` when an earlier cell already claimed it.
    pub fn mark_receiver(&self, id: i64) -> bool {
        self.processed_receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    /// Number of receivers claimed so far.
    #[must_use]
    pub fn processed_receiver_count(&self) -> usize {
        self.processed_receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn abort(&self) {
        self.flags.abort();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flags.is_aborted()
    }

    /// Records waiting to be written: queued plus staged by the writer.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.queue_size()
    }

    /// Keep paths in memory, within the shared ray cap.
    ///
    /// Returns the number of paths kept.
    pub fn keep_rays(&self, mut paths: Vec<PropagationPath>) -> usize {
        let allowed = self.queue.reserve_rays(paths.len());
        paths.truncate(allowed);
        if allowed > 0 {
            self.rays_in_memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(paths);
        }
        allowed
    }

    /// Take every path kept in memory so far.
    pub fn take_rays_in_memory(&self) -> Vec<PropagationPath> {
        std::mem::take(
            &mut *self
                .rays_in_memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}
