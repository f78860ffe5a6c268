//! Persistence of result tables.
//!
//! The writer thread talks to a [`ResultStore`]. Two stores ship with the
//! crate: [`MemoryResultStore`] keeps tables in memory and can be cloned to
//! inspect them after a run, [`SqlScriptStore`] renders every statement to a
//! SQL script, optionally gzip compressed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::PersistenceError;
use crate::output::{Row, TableKey, TableSpec, Value};

/// Destination of the result tables.
///
/// Calls come from the single writer thread, in this order: optional
/// `drop_table`, `create_table` for every table, then batches of
/// `insert_batch` each followed by `commit`, then `apply_key` per table and
/// `finish`.
pub trait ResultStore: Send {
    /// Remove the table if it exists.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when the store refuses.
    fn drop_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError>;

    /// # Errors
    ///
    /// [`PersistenceError::TableExists`] when the table is already there.
    fn create_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError>;

    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when the rows cannot be written.
    fn insert_batch(&mut self, table: &TableSpec, rows: &[Row]) -> Result<(), PersistenceError>;

    /// Make the rows inserted so far durable.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when flushing fails.
    fn commit(&mut self) -> Result<(), PersistenceError>;

    /// Apply the table's primary key or index.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::DuplicateKey`] when a primary key is not unique.
    fn apply_key(&mut self, table: &TableSpec) -> Result<(), PersistenceError>;

    /// Release the store once the run is over.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when closing fails.
    fn finish(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// A table held by [`MemoryResultStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    pub spec: TableSpec,
    pub rows: Vec<Row>,
    pub keyed: bool,
    /// Row count of every insert call, in order.
    pub batch_sizes: Vec<usize>,
}

impl MemoryTable {
    /// Values of one column.
    #[must_use]
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.spec
            .column_position(name)
            .map(|k| self.rows.iter().map(|row| row[k].clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: FxHashMap<String, MemoryTable>,
    commits: usize,
    finished: bool,
    inserts: usize,
}

/// Result store keeping everything in memory.
///
/// Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    state: Arc<Mutex<MemoryState>>,
    insert_delay: Duration,
    fail_after: Option<usize>,
}

impl MemoryResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` in every insert, to emulate a slow database.
    #[must_use]
    pub const fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = delay;
        self
    }

    /// Reject every insert after the first `inserts` ones.
    #[must_use]
    pub const fn with_failure_after(mut self, inserts: usize) -> Self {
        self.fail_after = Some(inserts);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, PersistenceError> {
        self.state
            .lock()
            .map_err(|_| PersistenceError::lock_poisoned("memory result store"))
    }

    /// Snapshot of one table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.tables.get(name).cloned())
    }

    /// Names of the existing tables, sorted.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .map(|state| state.tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.lock().map(|state| state.commits).unwrap_or(0)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().map(|state| state.finished).unwrap_or(false)
    }
}

impl ResultStore for MemoryResultStore {
    fn drop_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        self.lock()?.tables.remove(&table.name);
        Ok(())
    }

    fn create_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        let mut state = self.lock()?;
        if state.tables.contains_key(&table.name) {
            return Err(PersistenceError::TableExists(table.name.clone()));
        }
        state.tables.insert(
            table.name.clone(),
            MemoryTable {
                spec: table.clone(),
                rows: Vec::new(),
                keyed: false,
                batch_sizes: Vec::new(),
            },
        );
        Ok(())
    }

    fn insert_batch(&mut self, table: &TableSpec, rows: &[Row]) -> Result<(), PersistenceError> {
        if !self.insert_delay.is_zero() {
            thread::sleep(self.insert_delay);
        }
        let mut state = self.lock()?;
        if let Some(limit) = self.fail_after {
            if state.inserts >= limit {
                return Err(PersistenceError::Rejected(format!(
                    "insert into '{}' refused",
                    table.name
                )));
            }
        }
        state.inserts += 1;
        let stored = state
            .tables
            .get_mut(&table.name)
            .ok_or_else(|| PersistenceError::UnknownTable(table.name.clone()))?;
        let expected = stored.spec.columns.len();
        if let Some(row) = rows.iter().find(|row| row.len() != expected) {
            return Err(PersistenceError::RowShape {
                table: table.name.clone(),
                expected,
                actual: row.len(),
            });
        }
        stored.rows.extend_from_slice(rows);
        stored.batch_sizes.push(rows.len());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        self.lock()?.commits += 1;
        Ok(())
    }

    fn apply_key(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        let mut state = self.lock()?;
        let stored = state
            .tables
            .get_mut(&table.name)
            .ok_or_else(|| PersistenceError::UnknownTable(table.name.clone()))?;
        if let TableKey::PrimaryKey(columns) = &table.key {
            let positions: Vec<usize> = columns
                .iter()
                .filter_map(|name| stored.spec.column_position(name))
                .collect();
            let mut seen = FxHashSet::default();
            for row in &stored.rows {
                let key: Vec<String> = positions.iter().map(|&k| row[k].sql_literal()).collect();
                let key = key.join(", ");
                if !seen.insert(key.clone()) {
                    return Err(PersistenceError::DuplicateKey {
                        table: table.name.clone(),
                        key,
                    });
                }
            }
        }
        stored.keyed = true;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PersistenceError> {
        self.lock()?.finished = true;
        Ok(())
    }
}

// ============================================================================
// SQL script store
// ============================================================================

enum ScriptSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Writer(Box<dyn Write + Send>),
}

impl ScriptSink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Plain(w) => w,
            Self::Gzip(w) => w,
            Self::Writer(w) => w,
        }
    }

    fn close(self) -> Result<(), PersistenceError> {
        match self {
            Self::Plain(mut w) => w.flush()?,
            Self::Gzip(w) => w.finish()?.flush()?,
            Self::Writer(mut w) => w.flush()?,
        }
        Ok(())
    }
}

/// Result store writing SQL statements to a script.
pub struct SqlScriptStore {
    sink: Option<ScriptSink>,
    statements: usize,
}

impl std::fmt::Debug for SqlScriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlScriptStore")
            .field("open", &self.sink.is_some())
            .field("statements", &self.statements)
            .finish()
    }
}

impl SqlScriptStore {
    /// Create the script file at `path`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Io`] when the file cannot be created.
    pub fn create(path: impl AsRef<Path>, gzip: bool) -> Result<Self, PersistenceError> {
        let file = BufWriter::new(File::create(path)?);
        let sink = if gzip {
            ScriptSink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            ScriptSink::Plain(file)
        };
        Ok(Self {
            sink: Some(sink),
            statements: 0,
        })
    }

    /// Script written to any writer, uncompressed.
    #[must_use]
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Some(ScriptSink::Writer(writer)),
            statements: 0,
        }
    }

    /// Statements written so far.
    #[must_use]
    pub const fn statement_count(&self) -> usize {
        self.statements
    }

    fn statement(&mut self, sql: &str) -> Result<(), PersistenceError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| PersistenceError::Rejected("script already finished".to_string()))?;
        writeln!(sink.writer(), "{sql}")?;
        self.statements += 1;
        Ok(())
    }
}

impl ResultStore for SqlScriptStore {
    fn drop_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        self.statement(&table.drop_sql())
    }

    fn create_table(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        self.statement(&table.create_sql())
    }

    fn insert_batch(&mut self, table: &TableSpec, rows: &[Row]) -> Result<(), PersistenceError> {
        let expected = table.columns.len();
        if let Some(row) = rows.iter().find(|row| row.len() != expected) {
            return Err(PersistenceError::RowShape {
                table: table.name.clone(),
                expected,
                actual: row.len(),
            });
        }
        match table.insert_sql(rows) {
            Some(sql) => self.statement(&sql),
            None => Ok(()),
        }
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        self.statement("COMMIT;")
    }

    fn apply_key(&mut self, table: &TableSpec) -> Result<(), PersistenceError> {
        match table.key_sql() {
            Some(sql) => self.statement(&sql),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<(), PersistenceError> {
        match self.sink.take() {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }
}
