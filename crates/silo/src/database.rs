use std::path::Path;
use std::sync::Arc;

use storage::{LoadDatabaseError, SaveDatabaseError, Table};

/// A loaded database: the table and its partitions, shared read-only
/// with every query.
#[derive(Clone)]
pub struct Database {
    pub table: Arc<Table>,
}

/// Row counts and index sizes, per partition.
#[derive(Debug, serde::Serialize)]
pub struct DatabaseInfo {
    pub sequence_count: u64,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, serde::Serialize)]
pub struct PartitionInfo {
    pub sequence_count: u32,
    pub vertical_index_bytes: usize,
    pub coverage_index_bytes: usize,
}

impl Database {
    pub fn new(table: Table) -> Database {
        Database {
            table: Arc::new(table),
        }
    }

    pub fn load(path: &Path) -> Result<Database, LoadDatabaseError> {
        Ok(Database::new(storage::load_table(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), SaveDatabaseError> {
        storage::save_table(&self.table, path)
    }

    pub fn info(&self) -> DatabaseInfo {
        let partitions = self
            .table
            .partitions
            .iter()
            .map(|partition| {
                let mut vertical_index_bytes = 0;
                let mut coverage_index_bytes = 0;
                for (_, column) in &partition.columns.columns {
                    match column {
                        storage::ColumnPartition::NucleotideSequence(store) => {
                            vertical_index_bytes += store.vertical_index.size_in_bytes();
                            coverage_index_bytes += store.coverage_index.size_in_bytes();
                        }
                        storage::ColumnPartition::AminoAcidSequence(store) => {
                            vertical_index_bytes += store.vertical_index.size_in_bytes();
                            coverage_index_bytes += store.coverage_index.size_in_bytes();
                        }
                        _ => {}
                    }
                }
                PartitionInfo {
                    sequence_count: partition.sequence_count,
                    vertical_index_bytes,
                    coverage_index_bytes,
                }
            })
            .collect();
        let info = DatabaseInfo {
            sequence_count: self.table.total_sequence_count(),
            partitions,
        };
        tracing::info!(
            rows = info.sequence_count,
            partitions = info.partitions.len(),
            "database info"
        );
        info
    }
}
