//! Result channel, table layouts and the writer thread.

pub mod columns;
pub mod queue;
pub mod writer;

pub use columns::{
    output_tables, ColumnSource, ColumnSpec, ColumnType, Row, TableKey, TableSpec, Value,
};
pub use queue::{OutputRecord, ResultQueue};
pub use writer::{ResultWriter, WriterHandle, WriterReport, WriterState};
