//! Timing helpers for the per-cell pipeline.
//!
//! Provides an RAII scope logging its duration and a running per-cell timer.
use std::time::Instant;

use tracing::debug;

/// A profiling scope that measures elapsed time using RAII.
///
/// The duration is logged at debug level when dropped.
pub struct ProfilerScope {
    start: Instant,
    name: String,
}

impl ProfilerScope {
    /// Creates a new profiling scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Gets elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        debug!("{} done in {:.1} ms", self.name, self.elapsed_ms());
    }
}

/// Running statistics of cell processing times.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellTimer {
    last_ms: f64,
    total_ms: f64,
    count: usize,
}

impl CellTimer {
    /// Creates a new cell timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the processing time of one cell in milliseconds.
    pub fn record(&mut self, time_ms: f64) {
        self.last_ms = time_ms;
        self.total_ms += time_ms;
        self.count += 1;
    }

    /// Gets the last recorded cell time.
    pub fn last_ms(&self) -> f64 {
        self.last_ms
    }

    pub fn total_ms(&self) -> f64 {
        self.total_ms
    }

    /// Mean cell time, 0 before the first cell.
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
