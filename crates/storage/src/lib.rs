//! The columnar store: typed column partitions, the per-partition
//! sequence indexes, the table, and partition persistence.
//!
//! Every column splits into a metadata part shared across partitions
//! (intern tables, dictionaries, reference sequences) and a partition
//! part holding the rows. Partitions are built by appending rows,
//! finalized once, and read-only afterwards.

pub mod column;
mod error;
mod intern;
mod persist;
mod schema;
mod table;
pub mod zstd;

pub use column::ColumnPartition;
pub use error::{
    DuplicatePrimaryKeyError, LoadDatabaseError, PreprocessingError, SaveDatabaseError,
};
pub use intern::{Interner, SiloString, SILO_STRING_SIZE};
pub use persist::{load_table, save_table};
pub use schema::{ColumnIdentifier, ColumnType, TableSchema};
pub use table::{ColumnPartitionGroup, Table, TableMetadata, TablePartition};
