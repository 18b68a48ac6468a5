use std::sync::Arc;

use crate::error::PreprocessingError;
use crate::zstd::{compress_value, silo_zstd_decompressor, ZstdDictionary};

/// The rows of one ZSTD_COMPRESSED_STRING column in one partition.
/// Every value is compressed individually against the column's shared
/// dictionary, so single rows decompress independently.
#[derive(Debug)]
pub struct ZstdStringColumnPartition {
    pub values: Vec<Option<Vec<u8>>>,
    pub dictionary: Arc<ZstdDictionary>,
}

impl ZstdStringColumnPartition {
    pub fn new(dictionary: Arc<ZstdDictionary>) -> Self {
        ZstdStringColumnPartition {
            values: Vec::new(),
            dictionary,
        }
    }

    pub fn append(&mut self, value: Option<&str>) -> Result<(), PreprocessingError> {
        let compressed = value
            .map(|value| compress_value(value, &self.dictionary))
            .transpose()
            .map_err(PreprocessingError::Compression)?;
        self.values.push(compressed);
        Ok(())
    }

    /// Decompress one row; null stays null.
    pub fn value(&self, row_id: u32) -> std::io::Result<Option<String>> {
        self.values[row_id as usize]
            .as_deref()
            .map(|compressed| silo_zstd_decompressor(compressed, &self.dictionary))
            .transpose()
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
