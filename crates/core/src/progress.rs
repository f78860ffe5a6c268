//! Hierarchical progress tracking with cooperative cancellation.
//!
//! A run owns a root tracker. Each stage opens a sub-process with its own step
//! count; finishing a step of a sub-process advances its parent by the matching
//! fraction. Cancellation always lands on the root and is visible from every
//! node of the tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

#[derive(Debug)]
struct ProgressNode {
    step_count: usize,
    done: Mutex<f64>,
    parent: Option<Arc<ProgressNode>>,
    // Root only
    canceled: AtomicBool,
    log_interval: Option<Duration>,
    last_log: Mutex<Option<Instant>>,
}

impl ProgressNode {
    fn new(step_count: usize, parent: Option<Arc<Self>>, log_interval: Option<Duration>) -> Self {
        Self {
            step_count,
            done: Mutex::new(0.0),
            parent,
            canceled: AtomicBool::new(false),
            log_interval,
            last_log: Mutex::new(None),
        }
    }

    fn root(&self) -> &Self {
        let mut node = self;
        while let Some(parent) = node.parent.as_deref() {
            node = parent;
        }
        node
    }

    #[allow(clippy::cast_precision_loss)]
    fn size(&self) -> f64 {
        self.step_count as f64
    }

    fn push(&self, increment: f64) {
        let accepted = {
            let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
            if *done + increment <= self.size() + 1e-9 {
                *done += increment;
                Some(*done)
            } else {
                None
            }
        };
        let Some(done) = accepted else {
            return;
        };
        match &self.parent {
            Some(parent) if self.step_count > 0 => parent.push(increment / self.size()),
            Some(_) => {}
            None => self.log_progression(done),
        }
    }

    fn progression(&self) -> f64 {
        let root = self.root();
        if root.step_count == 0 {
            return 1.0;
        }
        let done = *root.done.lock().unwrap_or_else(PoisonError::into_inner);
        (done / root.size()).clamp(0.0, 1.0)
    }

    fn log_progression(&self, done: f64) {
        let Some(interval) = self.log_interval else {
            return;
        };
        let mut last = self.last_log.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if last.map_or(true, |t| now.duration_since(t) >= interval) {
            *last = Some(now);
            let percent = if self.step_count == 0 {
                100.0
            } else {
                done / self.size() * 100.0
            };
            info!("Progression {percent:.2} %");
        }
    }
}

/// Handle on one node of a progress tree. Cheap to clone, shareable across threads.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    node: Arc<ProgressNode>,
}

impl ProgressTracker {
    /// Root tracker, silent.
    #[must_use]
    pub fn root(step_count: usize) -> Self {
        Self {
            node: Arc::new(ProgressNode::new(step_count, None, None)),
        }
    }

    /// Root tracker logging its progression at most once per `interval`.
    #[must_use]
    pub fn logging_root(step_count: usize, interval: Duration) -> Self {
        Self {
            node: Arc::new(ProgressNode::new(step_count, None, Some(interval))),
        }
    }

    /// Open a child covering one step of this tracker, split in `step_count` steps.
    #[must_use]
    pub fn sub_process(&self, step_count: usize) -> Self {
        Self {
            node: Arc::new(ProgressNode::new(
                step_count,
                Some(Arc::clone(&self.node)),
                None,
            )),
        }
    }

    /// Mark one step as done.
    pub fn end_step(&self) {
        self.node.push(1.0);
    }

    /// Mark every remaining step as done.
    pub fn end_of_progress(&self) {
        let done = *self.node.done.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = self.node.size() - done;
        if remaining > 0.0 {
            self.node.push(remaining);
        }
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.node.step_count
    }

    /// Overall progression of the whole tree, in `[0, 1]`.
    #[must_use]
    pub fn progression(&self) -> f64 {
        self.node.progression()
    }

    /// Request cancellation of the whole tree.
    pub fn cancel(&self) {
        self.node.root().canceled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.node.root().canceled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sub_process_advances_parent() {
        let root = ProgressTracker::root(2);
        let first = root.sub_process(4);
        first.end_step();
        assert_relative_eq!(root.progression(), 0.125);
        first.end_of_progress();
        assert_relative_eq!(root.progression(), 0.5);

        let second = root.sub_process(1);
        second.end_step();
        assert_relative_eq!(second.progression(), 1.0);
    }

    #[test]
    fn test_overflowing_steps_are_ignored() {
        let root = ProgressTracker::root(1);
        let child = root.sub_process(1);
        child.end_step();
        child.end_step();
        assert_relative_eq!(root.progression(), 1.0);
    }

    #[test]
    fn test_cancel_propagates_to_root() {
        let root = ProgressTracker::root(3);
        let cell = root.sub_process(10);
        let worker = cell.sub_process(5);
        assert!(!root.is_canceled());
        worker.cancel();
        assert!(root.is_canceled());
        assert!(cell.is_canceled());
        assert!(root.sub_process(1).is_canceled());
    }

    #[test]
    fn test_concurrent_steps() {
        let root = ProgressTracker::root(1);
        let cell = root.sub_process(1000);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let cell = cell.clone();
                scope.spawn(move || {
                    for _ in 0..250 {
                        cell.end_step();
                    }
                });
            }
        });
        assert_relative_eq!(root.progression(), 1.0, epsilon = 1e-9);
    }
}
