//! Typed column partitions. Every column splits into a metadata part
//! shared by all partitions (intern tables, dictionaries, references)
//! and a partition part holding the rows.

mod boolean;
mod date;
mod float;
mod indexed_string;
mod integer;
pub mod sequence;
mod string;
mod zstd_string;

pub use boolean::{BoolColumnPartition, OptionalBool};
pub use date::{DateColumnPartition, EncodedDate};
pub use float::{float_eq, FloatColumnPartition};
pub use indexed_string::{Dictionary, IndexedStringColumnPartition};
pub use integer::{IntColumnPartition, INT_NULL};
pub use sequence::{
    HorizontalCoverageIndex, Insertion, InsertionIndex, SequenceColumnMetadata,
    SequenceColumnPartition, VerticalSequenceIndex,
};
pub use string::StringColumnPartition;
pub use zstd_string::ZstdStringColumnPartition;

use alphabet::{AminoAcid, Nucleotide};
use serde_json::Value;

/// One column's rows within one partition.
#[derive(Debug)]
pub enum ColumnPartition {
    Bool(BoolColumnPartition),
    Int(IntColumnPartition),
    Float(FloatColumnPartition),
    Date(DateColumnPartition),
    String(StringColumnPartition),
    IndexedString(IndexedStringColumnPartition),
    ZstdString(ZstdStringColumnPartition),
    NucleotideSequence(SequenceColumnPartition<Nucleotide>),
    AminoAcidSequence(SequenceColumnPartition<AminoAcid>),
}

impl ColumnPartition {
    pub fn len(&self) -> u32 {
        match self {
            ColumnPartition::Bool(column) => column.len(),
            ColumnPartition::Int(column) => column.len(),
            ColumnPartition::Float(column) => column.len(),
            ColumnPartition::Date(column) => column.len(),
            ColumnPartition::String(column) => column.len(),
            ColumnPartition::IndexedString(column) => column.len(),
            ColumnPartition::ZstdString(column) => column.len(),
            ColumnPartition::NucleotideSequence(column) => column.sequence_count(),
            ColumnPartition::AminoAcidSequence(column) => column.sequence_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Project one row to its JSON value, for Details output.
    /// Sequence columns have no row projection.
    pub fn value_as_json(&self, row_id: u32) -> std::io::Result<Value> {
        Ok(match self {
            ColumnPartition::Bool(column) => match column.value(row_id) {
                Some(value) => Value::Bool(value),
                None => Value::Null,
            },
            ColumnPartition::Int(column) => match column.value(row_id) {
                Some(value) => Value::from(value),
                None => Value::Null,
            },
            ColumnPartition::Float(column) => match column.value(row_id) {
                Some(value) => Value::from(value),
                None => Value::Null,
            },
            ColumnPartition::Date(column) => match column.value(row_id).format() {
                Some(value) => Value::String(value),
                None => Value::Null,
            },
            ColumnPartition::String(column) => match column.value(row_id) {
                Some(value) => Value::String(value),
                None => Value::Null,
            },
            ColumnPartition::IndexedString(column) => match column.value(row_id) {
                Some(value) => Value::String(value),
                None => Value::Null,
            },
            ColumnPartition::ZstdString(column) => match column.value(row_id)? {
                Some(value) => Value::String(value),
                None => Value::Null,
            },
            ColumnPartition::NucleotideSequence(_) | ColumnPartition::AminoAcidSequence(_) => {
                Value::Null
            }
        })
    }
}
