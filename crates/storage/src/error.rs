/// Errors raised while building a partition from input rows.
#[derive(thiserror::Error, Debug)]
pub enum PreprocessingError {
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("column {column}: cannot read {value} as {expected}")]
    ValueType {
        column: String,
        value: String,
        expected: &'static str,
    },
    #[error("sequence {sequence}: invalid character {chr:?} at position {position}")]
    InvalidCharacter {
        sequence: String,
        chr: char,
        position: u32,
    },
    #[error(
        "sequence {sequence}: row of length {length} at offset {offset} exceeds \
         reference length {reference_length}"
    )]
    SequenceTooLong {
        sequence: String,
        length: usize,
        offset: u32,
        reference_length: usize,
    },
    #[error("sequence {sequence}: insertion position {position} is out of range")]
    InsertionOutOfRange { sequence: String, position: u32 },
    #[error("sequence {sequence}: cannot parse insertion {value}, expected <position>:<symbols>")]
    MalformedInsertion { sequence: String, value: String },
    #[error("partition is already finalized and cannot accept rows")]
    PartitionFinalized,
    #[error("zstd compression failed: {0}")]
    Compression(#[source] std::io::Error),
}

/// Raised by `Table::validate` when two rows share a primary key.
#[derive(thiserror::Error, Debug)]
#[error("duplicate primary key {key}")]
pub struct DuplicatePrimaryKeyError {
    pub key: String,
}

/// Errors raised while reading a database from disk.
#[derive(thiserror::Error, Debug)]
pub enum LoadDatabaseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a SILO partition file")]
    BadMagic { path: String },
    #[error("{path} was written by an incompatible version ({version})")]
    BadVersion { path: String, version: u32 },
    #[error("{path}: corrupt partition data: {detail}")]
    Corrupt { path: String, detail: String },
    #[error("cannot parse schema descriptor: {0}")]
    BadSchema(#[source] serde_json::Error),
}

/// Errors raised while writing a database to disk.
#[derive(thiserror::Error, Debug)]
pub enum SaveDatabaseError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize schema descriptor: {0}")]
    BadSchema(#[source] serde_json::Error),
}
