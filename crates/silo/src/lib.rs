//! The top of the engine: the loaded [`Database`], the query driver,
//! and the streaming plumbing behind the `silo` binary.

mod database;
mod driver;
pub mod logging;

pub use database::{Database, DatabaseInfo, PartitionInfo};
pub use driver::{
    error_response, spawn_result_stream, STREAM_BATCH_INTERVAL, STREAM_BATCH_SIZE,
};

// Re-exported so binary and tests speak one vocabulary.
pub use query::{Query, QueryError, QueryResult, QueryResultEntry};
