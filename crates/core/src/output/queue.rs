//! Result channel between the aggregating workers and the writer.
//!
//! All series share one bounded channel. Its capacity is the high-water mark:
//! a producer facing a full channel waits one poll interval at a time, checking
//! the abort flag and its progress tracker between attempts. The writer records how many records it has
//! taken off the channel but not yet written, so [`ResultQueue::queue_size`]
//! covers everything in flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::aggregation::ReceiverLevelRecord;
use crate::config::{OutputSeries, RunConfig};
use crate::context::RunFlags;
use crate::progress::ProgressTracker;
use crate::propagation::PropagationPath;

/// One row to persist.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRecord {
    Level {
        series: OutputSeries,
        record: ReceiverLevelRecord,
    },
    /// A path with its period and attenuation set.
    Ray(PropagationPath),
}

impl OutputRecord {
    #[must_use]
    pub const fn series(&self) -> OutputSeries {
        match self {
            Self::Level { series, .. } => *series,
            Self::Ray(_) => OutputSeries::Rays,
        }
    }
}

/// Bounded multi-producer channel of [`OutputRecord`]s.
#[derive(Debug)]
pub struct ResultQueue {
    sender: Sender<OutputRecord>,
    receiver: Receiver<OutputRecord>,
    flags: Arc<RunFlags>,
    staged: AtomicUsize,
    total_rays: AtomicU64,
    maximum_rays: u64,
    poll: Duration,
}

impl ResultQueue {
    #[must_use]
    pub fn new(config: &RunConfig, flags: Arc<RunFlags>) -> Self {
        let (sender, receiver) = bounded(config.output_maximum_queue.max(1));
        Self {
            sender,
            receiver,
            flags,
            staged: AtomicUsize::new(0),
            total_rays: AtomicU64::new(0),
            maximum_rays: config.maximum_rays_output_count,
            poll: config.backpressure_poll(),
        }
    }

    /// Consumer end, for the writer.
    #[must_use]
    pub fn receiver(&self) -> Receiver<OutputRecord> {
        self.receiver.clone()
    }

    /// High-water mark.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or(usize::MAX)
    }

    /// Records waiting in the channel plus those staged by the writer.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.receiver.len() + self.staged.load(Ordering::SeqCst)
    }

    /// Set by the writer to the number of records it holds unwritten.
    pub fn set_staged(&self, count: usize) {
        self.staged.store(count, Ordering::SeqCst);
    }

    /// Rays reserved so far, in both export modes.
    #[must_use]
    pub fn total_rays(&self) -> u64 {
        self.total_rays.load(Ordering::SeqCst)
    }

    /// Reserve room for `requested` rays under the global cap.
    ///
    /// Returns how many of them may be kept; 0 once the cap is reached.
    pub fn reserve_rays(&self, requested: usize) -> usize {
        let requested_u64 = requested as u64;
        let previous = self.total_rays.fetch_add(requested_u64, Ordering::SeqCst);
        if self.maximum_rays == 0 {
            return requested;
        }
        if previous >= self.maximum_rays {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let remaining = (self.maximum_rays - previous).min(requested_u64) as usize;
        remaining
    }

    /// Queue one level record.
    ///
    /// Returns `false` when the run was aborted or `progress` canceled while
    /// waiting; `progress` is canceled in both cases.
    #[must_use]
    pub fn push_level(
        &self,
        series: OutputSeries,
        record: ReceiverLevelRecord,
        progress: &ProgressTracker,
    ) -> bool {
        self.send(OutputRecord::Level { series, record }, progress)
    }

    /// Queue paths for the rays table, truncated to the global cap.
    ///
    /// Returns `false` when the run was aborted or `progress` canceled while
    /// waiting.
    #[must_use]
    pub fn push_rays(&self, mut paths: Vec<PropagationPath>, progress: &ProgressTracker) -> bool {
        let allowed = self.reserve_rays(paths.len());
        paths.truncate(allowed);
        paths
            .into_iter()
            .all(|path| self.send(OutputRecord::Ray(path), progress))
    }

    fn send(&self, mut record: OutputRecord, progress: &ProgressTracker) -> bool {
        loop {
            if self.flags.is_aborted() || progress.is_canceled() {
                progress.cancel();
                return false;
            }
            match self.sender.send_timeout(record, self.poll) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => record = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    progress.cancel();
                    return false;
                }
            }
        }
    }
}
