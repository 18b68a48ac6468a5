use std::sync::Arc;

use alphabet::{AminoAcid, Nucleotide, Symbol};
use fxhash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::column::{
    BoolColumnPartition, ColumnPartition, DateColumnPartition, Dictionary, EncodedDate,
    FloatColumnPartition, Insertion, IndexedStringColumnPartition, IntColumnPartition,
    SequenceColumnMetadata, SequenceColumnPartition, StringColumnPartition,
    ZstdStringColumnPartition,
};
use crate::error::{DuplicatePrimaryKeyError, PreprocessingError};
use crate::intern::Interner;
use crate::schema::{ColumnIdentifier, ColumnType, TableSchema};
use crate::zstd::ZstdDictionary;

/// The column parts shared by every partition of a table: intern
/// tables, dictionaries, compression dictionaries and reference
/// sequences, keyed by column name.
#[derive(Debug, Default)]
pub struct TableMetadata {
    pub interners: FxHashMap<String, Arc<Interner>>,
    pub dictionaries: FxHashMap<String, Arc<Dictionary>>,
    pub zstd_dictionaries: FxHashMap<String, Arc<ZstdDictionary>>,
    pub nucleotide_sequences: FxHashMap<String, Arc<SequenceColumnMetadata<Nucleotide>>>,
    pub amino_acid_sequences: FxHashMap<String, Arc<SequenceColumnMetadata<AminoAcid>>>,
}

/// The ordered column partitions of one table partition, aligned with
/// the schema's column order.
#[derive(Debug, Default)]
pub struct ColumnPartitionGroup {
    pub columns: Vec<(ColumnIdentifier, ColumnPartition)>,
}

impl ColumnPartitionGroup {
    pub fn get(&self, name: &str) -> Option<&ColumnPartition> {
        self.columns
            .iter()
            .find(|(identifier, _)| identifier.name == name)
            .map(|(_, column)| column)
    }

    pub fn nucleotide_sequence(&self, name: &str) -> Option<&SequenceColumnPartition<Nucleotide>> {
        match self.get(name) {
            Some(ColumnPartition::NucleotideSequence(column)) => Some(column),
            _ => None,
        }
    }

    pub fn amino_acid_sequence(&self, name: &str) -> Option<&SequenceColumnPartition<AminoAcid>> {
        match self.get(name) {
            Some(ColumnPartition::AminoAcidSequence(column)) => Some(column),
            _ => None,
        }
    }
}

/// One horizontal slice of the table. Built by appending rows, then
/// finalized; read-only afterwards.
#[derive(Debug, Default)]
pub struct TablePartition {
    pub sequence_count: u32,
    pub columns: ColumnPartitionGroup,
}

/// A parsed cell, ready to be appended without further validation.
enum ParsedCell {
    Bool(Option<bool>),
    Int(Option<i32>),
    Float(Option<f64>),
    Date(Option<EncodedDate>),
    String(Option<String>),
    Zstd(Option<String>),
    Sequence(Option<(String, u32, Vec<Insertion>)>),
}

impl TablePartition {
    /// Append one row given as a JSON object of column name to value.
    /// The row is fully validated before any column is touched, so a
    /// rejected row leaves the partition unchanged.
    pub fn append_row(&mut self, row: &Value) -> Result<(), PreprocessingError> {
        let object = row.as_object().ok_or_else(|| PreprocessingError::ValueType {
            column: "<row>".to_string(),
            value: row.to_string(),
            expected: "object",
        })?;
        for key in object.keys() {
            if self.columns.get(key).is_none() {
                return Err(PreprocessingError::UnknownColumn(key.clone()));
            }
        }

        let mut cells = Vec::with_capacity(self.columns.columns.len());
        for (identifier, column) in &self.columns.columns {
            let value = object.get(&identifier.name).unwrap_or(&Value::Null);
            cells.push(parse_cell(identifier, column, value)?);
        }

        for (cell, (_, column)) in cells.into_iter().zip(self.columns.columns.iter_mut()) {
            append_cell(column, cell)?;
        }
        self.sequence_count += 1;
        Ok(())
    }

    /// Compact and index all columns. Called once, after ingest.
    pub fn finalize(&mut self) {
        for (_, column) in &mut self.columns.columns {
            match column {
                ColumnPartition::IndexedString(column) => column.finalize(),
                ColumnPartition::NucleotideSequence(column) => column.finalize(),
                ColumnPartition::AminoAcidSequence(column) => column.finalize(),
                _ => {}
            }
        }
        debug_assert!(
            self.columns
                .columns
                .iter()
                .all(|(_, column)| column.len() == self.sequence_count),
            "column partitions diverged in length"
        );
    }
}

fn parse_cell(
    identifier: &ColumnIdentifier,
    column: &ColumnPartition,
    value: &Value,
) -> Result<ParsedCell, PreprocessingError> {
    let type_error = |expected: &'static str| PreprocessingError::ValueType {
        column: identifier.name.clone(),
        value: value.to_string(),
        expected,
    };
    Ok(match identifier.column_type {
        ColumnType::Bool => ParsedCell::Bool(match value {
            Value::Null => None,
            Value::Bool(value) => Some(*value),
            _ => return Err(type_error("bool")),
        }),
        ColumnType::Int => ParsedCell::Int(match value {
            Value::Null => None,
            Value::Number(number) => Some(
                number
                    .as_i64()
                    .and_then(|number| i32::try_from(number).ok())
                    .ok_or_else(|| type_error("int32"))?,
            ),
            _ => return Err(type_error("int32")),
        }),
        ColumnType::Float => ParsedCell::Float(match value {
            Value::Null => None,
            Value::Number(number) => {
                Some(number.as_f64().ok_or_else(|| type_error("float64"))?)
            }
            _ => return Err(type_error("float64")),
        }),
        ColumnType::Date => ParsedCell::Date(match value {
            Value::Null => None,
            Value::String(text) => {
                Some(EncodedDate::parse(text).ok_or_else(|| type_error("date (YYYY-MM-DD)"))?)
            }
            _ => return Err(type_error("date (YYYY-MM-DD)")),
        }),
        ColumnType::String | ColumnType::IndexedString => ParsedCell::String(match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            _ => return Err(type_error("string")),
        }),
        ColumnType::ZstdCompressedString => ParsedCell::Zstd(match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            _ => return Err(type_error("string")),
        }),
        ColumnType::NucleotideSequence => {
            parse_sequence_cell::<Nucleotide>(identifier, column, value)?
        }
        ColumnType::AminoAcidSequence => {
            parse_sequence_cell::<AminoAcid>(identifier, column, value)?
        }
    })
}

fn parse_sequence_cell<S: Symbol>(
    identifier: &ColumnIdentifier,
    column: &ColumnPartition,
    value: &Value,
) -> Result<ParsedCell, PreprocessingError> {
    let type_error = |expected: &'static str| PreprocessingError::ValueType {
        column: identifier.name.clone(),
        value: value.to_string(),
        expected,
    };
    let reference_length = match column {
        ColumnPartition::NucleotideSequence(column) => column.metadata.reference_length(),
        ColumnPartition::AminoAcidSequence(column) => column.metadata.reference_length(),
        _ => 0,
    };

    let (sequence, offset, insertions) = match value {
        Value::Null => return Ok(ParsedCell::Sequence(None)),
        Value::String(sequence) => (sequence.clone(), 0u32, Vec::new()),
        Value::Object(fields) => {
            let sequence = match fields.get("sequence") {
                Some(Value::String(sequence)) => sequence.clone(),
                Some(Value::Null) | None => return Ok(ParsedCell::Sequence(None)),
                _ => return Err(type_error("sequence object")),
            };
            let offset = match fields.get("offset") {
                Some(Value::Number(number)) => number
                    .as_u64()
                    .and_then(|number| u32::try_from(number).ok())
                    .ok_or_else(|| type_error("sequence offset"))?,
                None => 0,
                _ => return Err(type_error("sequence offset")),
            };
            let insertions = match fields.get("insertions") {
                Some(Value::Array(values)) => values
                    .iter()
                    .map(|value| match value {
                        Value::String(text) => Insertion::parse::<S>(&identifier.name, text),
                        _ => Err(type_error("insertion list")),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
                _ => return Err(type_error("insertion list")),
            };
            (sequence, offset, insertions)
        }
        _ => return Err(type_error("sequence")),
    };

    // Validate now so the later append cannot fail halfway through a row.
    if offset as usize + sequence.len() > reference_length {
        return Err(PreprocessingError::SequenceTooLong {
            sequence: identifier.name.clone(),
            length: sequence.len(),
            offset,
            reference_length,
        });
    }
    for (idx, chr) in sequence.chars().enumerate() {
        if S::from_char(chr).is_none() {
            return Err(PreprocessingError::InvalidCharacter {
                sequence: identifier.name.clone(),
                chr,
                position: offset + idx as u32,
            });
        }
    }
    for insertion in &insertions {
        if insertion.position as usize >= reference_length {
            return Err(PreprocessingError::InsertionOutOfRange {
                sequence: identifier.name.clone(),
                position: insertion.position,
            });
        }
    }
    Ok(ParsedCell::Sequence(Some((sequence, offset, insertions))))
}

fn append_cell(column: &mut ColumnPartition, cell: ParsedCell) -> Result<(), PreprocessingError> {
    match (column, cell) {
        (ColumnPartition::Bool(column), ParsedCell::Bool(value)) => column.append(value),
        (ColumnPartition::Int(column), ParsedCell::Int(value)) => column.append(value),
        (ColumnPartition::Float(column), ParsedCell::Float(value)) => column.append(value),
        (ColumnPartition::Date(column), ParsedCell::Date(value)) => column.append(value),
        (ColumnPartition::String(column), ParsedCell::String(value)) => {
            column.append(value.as_deref())
        }
        (ColumnPartition::IndexedString(column), ParsedCell::String(value)) => {
            column.append(value.as_deref())
        }
        (ColumnPartition::ZstdString(column), ParsedCell::Zstd(value)) => {
            column.append(value.as_deref())?
        }
        (ColumnPartition::NucleotideSequence(column), ParsedCell::Sequence(value)) => match value {
            Some((sequence, offset, insertions)) => {
                column.append(&sequence, offset, &insertions)?
            }
            None => column.append_null()?,
        },
        (ColumnPartition::AminoAcidSequence(column), ParsedCell::Sequence(value)) => match value {
            Some((sequence, offset, insertions)) => {
                column.append(&sequence, offset, &insertions)?
            }
            None => column.append_null()?,
        },
        _ => unreachable!("cells are parsed against the same schema order"),
    }
    Ok(())
}

/// The table: a schema, the shared column metadata, and the ordered
/// list of partitions.
#[derive(Debug)]
pub struct Table {
    pub schema: TableSchema,
    pub metadata: TableMetadata,
    pub partitions: Vec<TablePartition>,
}

impl Table {
    /// Build an empty table. `references` supplies the reference
    /// sequence per sequence column; `zstd_dictionaries` the optional
    /// compression dictionary per zstd column.
    pub fn new(
        schema: TableSchema,
        references: &FxHashMap<String, String>,
        zstd_dictionaries: FxHashMap<String, ZstdDictionary>,
    ) -> Result<Self, PreprocessingError> {
        match schema.column(&schema.primary_key) {
            Some(column) if column.column_type == ColumnType::String => {}
            _ => {
                return Err(PreprocessingError::ValueType {
                    column: schema.primary_key.clone(),
                    value: "<primary key>".to_string(),
                    expected: "a STRING column of the schema",
                })
            }
        }
        let mut metadata = TableMetadata::default();
        for column in &schema.columns {
            match column.column_type {
                ColumnType::String => {
                    metadata
                        .interners
                        .insert(column.name.clone(), Arc::new(Interner::new()));
                }
                ColumnType::IndexedString => {
                    metadata
                        .dictionaries
                        .insert(column.name.clone(), Arc::new(Dictionary::new()));
                }
                ColumnType::ZstdCompressedString => {
                    let dictionary = zstd_dictionaries
                        .get(&column.name)
                        .cloned()
                        .unwrap_or_default();
                    metadata
                        .zstd_dictionaries
                        .insert(column.name.clone(), Arc::new(dictionary));
                }
                ColumnType::NucleotideSequence => {
                    let reference = references.get(&column.name).ok_or_else(|| {
                        PreprocessingError::UnknownColumn(column.name.clone())
                    })?;
                    metadata.nucleotide_sequences.insert(
                        column.name.clone(),
                        Arc::new(SequenceColumnMetadata::new(column.name.clone(), reference)?),
                    );
                }
                ColumnType::AminoAcidSequence => {
                    let reference = references.get(&column.name).ok_or_else(|| {
                        PreprocessingError::UnknownColumn(column.name.clone())
                    })?;
                    metadata.amino_acid_sequences.insert(
                        column.name.clone(),
                        Arc::new(SequenceColumnMetadata::new(column.name.clone(), reference)?),
                    );
                }
                _ => {}
            }
        }
        Ok(Table {
            schema,
            metadata,
            partitions: Vec::new(),
        })
    }

    /// Start a new, empty partition and return its index.
    pub fn create_partition(&mut self) -> usize {
        let mut columns = Vec::with_capacity(self.schema.columns.len());
        for identifier in &self.schema.columns {
            let column = match identifier.column_type {
                ColumnType::Bool => ColumnPartition::Bool(BoolColumnPartition::new()),
                ColumnType::Int => ColumnPartition::Int(IntColumnPartition::new()),
                ColumnType::Float => ColumnPartition::Float(FloatColumnPartition::new()),
                ColumnType::Date => ColumnPartition::Date(DateColumnPartition::new()),
                ColumnType::String => ColumnPartition::String(StringColumnPartition::new(
                    self.metadata.interners[&identifier.name].clone(),
                )),
                ColumnType::IndexedString => {
                    ColumnPartition::IndexedString(IndexedStringColumnPartition::new(
                        self.metadata.dictionaries[&identifier.name].clone(),
                    ))
                }
                ColumnType::ZstdCompressedString => {
                    ColumnPartition::ZstdString(ZstdStringColumnPartition::new(
                        self.metadata.zstd_dictionaries[&identifier.name].clone(),
                    ))
                }
                ColumnType::NucleotideSequence => {
                    ColumnPartition::NucleotideSequence(SequenceColumnPartition::new(
                        self.metadata.nucleotide_sequences[&identifier.name].clone(),
                    ))
                }
                ColumnType::AminoAcidSequence => {
                    ColumnPartition::AminoAcidSequence(SequenceColumnPartition::new(
                        self.metadata.amino_acid_sequences[&identifier.name].clone(),
                    ))
                }
            };
            columns.push((identifier.clone(), column));
        }
        self.partitions.push(TablePartition {
            sequence_count: 0,
            columns: ColumnPartitionGroup { columns },
        });
        self.partitions.len() - 1
    }

    /// Check primary-key uniqueness across all partitions. Called after
    /// bulk append; a violation refuses the ingest commit.
    pub fn validate(&self) -> Result<(), DuplicatePrimaryKeyError> {
        let interner = &self.metadata.interners[&self.schema.primary_key];
        let mut seen = FxHashSet::default();
        for partition in &self.partitions {
            let Some(ColumnPartition::String(column)) =
                partition.columns.get(&self.schema.primary_key)
            else {
                continue;
            };
            for fingerprint in &column.values {
                if !seen.insert(*fingerprint) {
                    return Err(DuplicatePrimaryKeyError {
                        key: interner.resolve(fingerprint).unwrap_or_default(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn total_sequence_count(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| partition.sequence_count as u64)
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn test_table() -> Table {
        let schema = TableSchema {
            columns: vec![
                ColumnIdentifier {
                    name: "primaryKey".to_string(),
                    column_type: ColumnType::String,
                },
                ColumnIdentifier {
                    name: "country".to_string(),
                    column_type: ColumnType::IndexedString,
                },
                ColumnIdentifier {
                    name: "age".to_string(),
                    column_type: ColumnType::Int,
                },
                ColumnIdentifier {
                    name: "segment1".to_string(),
                    column_type: ColumnType::NucleotideSequence,
                },
            ],
            primary_key: "primaryKey".to_string(),
            default_nucleotide_sequence: Some("segment1".to_string()),
            default_amino_acid_sequence: None,
        };
        let mut references = FxHashMap::default();
        references.insert("segment1".to_string(), "ATGCN".to_string());
        Table::new(schema, &references, FxHashMap::default()).unwrap()
    }

    #[test]
    fn test_append_validates_before_touching_columns() {
        let mut table = test_table();
        let partition_idx = table.create_partition();
        let partition = &mut table.partitions[partition_idx];
        partition
            .append_row(&json!({
                "primaryKey": "id_0", "country": "Switzerland", "age": 7,
                "segment1": "ACGT-",
            }))
            .unwrap();
        // Bad age: the whole row is refused, nothing grows.
        let result = partition.append_row(&json!({
            "primaryKey": "id_1", "country": "Germany", "age": "old",
            "segment1": "ACGT-",
        }));
        assert!(matches!(result, Err(PreprocessingError::ValueType { .. })));
        assert_eq!(partition.sequence_count, 1);
        for (_, column) in &partition.columns.columns {
            assert_eq!(column.len(), 1);
        }
    }

    #[test]
    fn test_unknown_columns_are_rejected() {
        let mut table = test_table();
        let partition_idx = table.create_partition();
        let result = table.partitions[partition_idx].append_row(&json!({
            "primaryKey": "id_0", "elevation": 1200,
        }));
        assert!(matches!(result, Err(PreprocessingError::UnknownColumn(name)) if name == "elevation"));
    }

    #[test]
    fn test_validate_finds_duplicate_primary_keys_across_partitions() {
        let mut table = test_table();
        let first = table.create_partition();
        table.partitions[first]
            .append_row(&json!({"primaryKey": "id_0", "segment1": null}))
            .unwrap();
        let second = table.create_partition();
        table.partitions[second]
            .append_row(&json!({"primaryKey": "id_0", "segment1": null}))
            .unwrap();
        let error = table.validate().unwrap_err();
        assert_eq!(error.key, "id_0");
    }

    #[test]
    fn test_validate_accepts_unique_keys() {
        let mut table = test_table();
        let partition_idx = table.create_partition();
        for key in ["id_0", "id_1", "id_2"] {
            table.partitions[partition_idx]
                .append_row(&json!({"primaryKey": key, "segment1": null}))
                .unwrap();
        }
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_sequence_object_form_with_insertions() {
        let mut table = test_table();
        let partition_idx = table.create_partition();
        let partition = &mut table.partitions[partition_idx];
        partition
            .append_row(&json!({
                "primaryKey": "id_0",
                "segment1": {"sequence": "ACGT-", "insertions": ["3:A"]},
            }))
            .unwrap();
        partition.finalize();
        let store = partition.columns.nucleotide_sequence("segment1").unwrap();
        assert!(store.insertion_index.bitmap_for(2, "A").is_some());
    }
}
