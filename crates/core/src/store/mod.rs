//! Input and output data stores.

pub mod input;
pub mod output;

pub use input::{
    BuildingRecord, InputStore, MemoryInputStore, ReceiverRecord, SoilRecord, SourceRecord,
    TableSchema,
};
pub use output::{MemoryResultStore, MemoryTable, ResultStore, SqlScriptStore};
