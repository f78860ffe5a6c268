//! The result writer thread.
//!
//! One thread per run drains the result channel into a [`ResultStore`]:
//!
//! 1. **Initializing**: drop (if configured) and create every output table.
//! 2. **Draining**: take records off the channel into per-table staging, then
//!    insert a batch from the first non-empty table in priority order
//!    (day, evening, night, den, rays) and commit.
//! 3. **Idle**: nothing staged, wait on the channel for a short while.
//! 4. **Finalizing**: once asked to stop and the channel is empty, apply the
//!    primary keys and indexes.
//!
//! A store failure or panic is logged, aborts the run and ends the thread.
//! Producers notice the abort flag at their next push.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use super::columns::{output_tables, TableSpec};
use super::queue::OutputRecord;
use crate::context::{RunContext, RunFlags};
use crate::error::{NoiseMapError, PersistenceError};
use crate::store::ResultStore;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

/// Lifecycle of the writer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WriterState {
    NotStarted = 0,
    Initializing = 1,
    Draining = 2,
    Idle = 3,
    Finalizing = 4,
    Stopped = 5,
}

impl WriterState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Initializing,
            2 => Self::Draining,
            3 => Self::Idle,
            4 => Self::Finalizing,
            _ => Self::Stopped,
        }
    }
}

/// What the writer wrote before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub rows_written: usize,
    pub batches: usize,
    pub rows_per_table: BTreeMap<String, usize>,
    /// False when the writer stopped because the run was aborted.
    pub finalized: bool,
}

/// Writes the records of one run.
pub struct ResultWriter {
    store: Box<dyn ResultStore>,
    context: Arc<RunContext>,
    tables: Vec<TableSpec>,
    staging: Vec<Vec<OutputRecord>>,
    state: Arc<AtomicU8>,
    report: WriterReport,
}

impl ResultWriter {
    /// Start the writer thread and wait until the output tables exist.
    ///
    /// # Errors
    ///
    /// Returns the [`PersistenceError`] raised while creating the tables, or
    /// an I/O error when the thread cannot be spawned.
    pub fn start(
        store: Box<dyn ResultStore>,
        context: Arc<RunContext>,
    ) -> Result<WriterHandle, NoiseMapError> {
        let tables = output_tables(context.config());
        let state = Arc::new(AtomicU8::new(WriterState::NotStarted as u8));
        let flags = Arc::clone(context.flags());
        let writer = Self {
            store,
            staging: vec![Vec::new(); tables.len()],
            tables,
            context,
            state: Arc::clone(&state),
            report: WriterReport::default(),
        };

        let (ready_tx, ready_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("result-writer".into())
            .spawn(move || writer.run(&ready_tx))
            .map_err(PersistenceError::Io)?;

        let mut handle = WriterHandle {
            thread: Some(thread),
            state,
            flags,
        };
        if ready_rx.recv().is_err() {
            // The thread ended during initialization.
            return match handle.join() {
                Ok(_) => Err(NoiseMapError::Aborted),
                Err(err) => Err(err),
            };
        }
        Ok(handle)
    }

    fn set_state(&self, state: WriterState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn run(mut self, ready: &Sender<()>) -> Result<WriterReport, PersistenceError> {
        // A panicking store must still abort the run, or producers would wait
        // on a full channel forever.
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.write_all(ready)))
            .unwrap_or_else(|payload| {
                Err(PersistenceError::Rejected(format!(
                    "result writer panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        if let Err(err) = &result {
            error!("Result writer failed: {err}");
            self.context.abort();
        }
        self.context.queue().set_staged(0);
        self.set_state(WriterState::Stopped);
        result.map(|()| self.report)
    }

    fn write_all(&mut self, ready: &Sender<()>) -> Result<(), PersistenceError> {
        self.set_state(WriterState::Initializing);
        self.initialize()?;
        self.set_state(WriterState::Idle);
        // start() may have given up waiting, nothing to signal then
        let _ = ready.send(());

        let flags = Arc::clone(self.context.flags());
        let receiver = self.context.queue().receiver();
        let batch_size = self.context.config().writer_batch_size;
        let idle_sleep = self.context.config().writer_idle_sleep();

        loop {
            if flags.is_aborted() {
                debug!("Result writer canceled");
                self.store.commit()?;
                self.store.finish()?;
                return Ok(());
            }

            while self.staged_count() < batch_size {
                match receiver.try_recv() {
                    Ok(record) => self.stage(record)?,
                    Err(_) => break,
                }
            }
            self.context.queue().set_staged(self.staged_count());

            if let Some(k) = self.staging.iter().position(|records| !records.is_empty()) {
                self.set_state(WriterState::Draining);
                self.write_batch(k, batch_size)?;
                self.context.queue().set_staged(self.staged_count());
                continue;
            }

            if flags.exit_requested() && receiver.is_empty() {
                break;
            }
            self.set_state(WriterState::Idle);
            match receiver.recv_timeout(idle_sleep) {
                Ok(record) => {
                    self.stage(record)?;
                    self.context.queue().set_staged(self.staged_count());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.set_state(WriterState::Finalizing);
        info!("Write done, apply primary keys");
        for table in &self.tables {
            self.store.apply_key(table)?;
        }
        self.store.commit()?;
        self.store.finish()?;
        self.report.finalized = true;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PersistenceError> {
        let drop_existing = self.context.config().drop_existing_tables;
        for table in &self.tables {
            if drop_existing {
                self.store.drop_table(table)?;
            }
            self.store.create_table(table)?;
            debug!("Created table {}", table.name);
        }
        self.store.commit()
    }

    fn staged_count(&self) -> usize {
        self.staging.iter().map(Vec::len).sum()
    }

    fn stage(&mut self, record: OutputRecord) -> Result<(), PersistenceError> {
        let series = record.series();
        let k = self
            .tables
            .iter()
            .position(|table| table.series == series)
            .ok_or_else(|| PersistenceError::UnknownTable(format!("{series:?}")))?;
        self.staging[k].push(record);
        Ok(())
    }

    fn write_batch(&mut self, k: usize, batch_size: usize) -> Result<(), PersistenceError> {
        let floor = self.context.config().level_floor_db;
        let take = self.staging[k].len().min(batch_size);
        let table = &self.tables[k];
        let rows = self.staging[k][..take]
            .iter()
            .map(|record| table.render(record, floor))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.insert_batch(table, &rows)?;
        self.store.commit()?;
        self.staging[k].drain(..take);

        self.report.rows_written += rows.len();
        self.report.batches += 1;
        *self
            .report
            .rows_per_table
            .entry(table.name.clone())
            .or_default() += rows.len();
        Ok(())
    }
}

/// Handle on a running [`ResultWriter`].
///
/// Dropping the handle without calling [`stop`](Self::stop) or
/// [`cancel`](Self::cancel) aborts the run and waits for the thread.
#[derive(Debug)]
pub struct WriterHandle {
    thread: Option<JoinHandle<Result<WriterReport, PersistenceError>>>,
    state: Arc<AtomicU8>,
    flags: Arc<RunFlags>,
}

impl WriterHandle {
    #[must_use]
    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Write everything still queued, apply the keys and wait for the thread.
    ///
    /// # Errors
    ///
    /// The [`PersistenceError`] that ended the writer, or
    /// [`NoiseMapError::Aborted`] when the run was aborted meanwhile.
    pub fn stop(mut self) -> Result<WriterReport, NoiseMapError> {
        self.flags.request_exit();
        let report = self.join()?;
        if report.finalized {
            Ok(report)
        } else {
            Err(NoiseMapError::Aborted)
        }
    }

    /// Abort the run and wait for the thread, without applying keys.
    ///
    /// # Errors
    ///
    /// The [`PersistenceError`] when the writer had already failed.
    pub fn cancel(mut self) -> Result<WriterReport, NoiseMapError> {
        self.flags.abort();
        self.join()
    }

    fn join(&mut self) -> Result<WriterReport, NoiseMapError> {
        let Some(thread) = self.thread.take() else {
            return Err(NoiseMapError::Aborted);
        };
        match thread.join() {
            Ok(result) => result.map_err(NoiseMapError::from),
            Err(_) => Err(PersistenceError::Rejected("result writer thread panicked".to_string()).into()),
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.flags.abort();
            let _ = thread.join();
        }
    }
}
