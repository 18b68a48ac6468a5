//! On-disk layout: a database directory holds `schema.json` plus one
//! `P<i>.silo` binary per partition.
//!
//! The partition format is self-describing (magic, version, named
//! length-prefixed column sections) so that an identical build round-
//! trips it; bit-exact cross-build compatibility is not a goal. Bitmap
//! payloads use roaring's native serialization.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use alphabet::Symbol;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxHashMap;
use roaring::RoaringBitmap;
use roaring_util::Container;

use crate::column::sequence::DiffKey;
use crate::column::{
    ColumnPartition, EncodedDate, HorizontalCoverageIndex, OptionalBool,
    SequenceColumnPartition, VerticalSequenceIndex,
};
use crate::error::{LoadDatabaseError, SaveDatabaseError};
use crate::intern::SiloString;
use crate::schema::{ColumnType, TableSchema};
use crate::table::{Table, TablePartition};
use crate::zstd::ZstdDictionary;

const MAGIC: &[u8; 4] = b"SILO";
const FORMAT_VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDescriptor {
    schema: TableSchema,
    references: BTreeMap<String, String>,
    zstd_dictionaries: BTreeMap<String, String>,
    partition_count: usize,
}

/// Write the whole table to `dir`.
pub fn save_table(table: &Table, dir: &Path) -> Result<(), SaveDatabaseError> {
    let io_error = |path: &Path| {
        let path = path.display().to_string();
        move |source| SaveDatabaseError::Io { path: path.clone(), source }
    };
    std::fs::create_dir_all(dir).map_err(io_error(dir))?;

    let descriptor = SchemaDescriptor {
        schema: table.schema.clone(),
        references: table
            .metadata
            .nucleotide_sequences
            .iter()
            .map(|(name, metadata)| (name.clone(), symbols_to_string(&metadata.reference_sequence)))
            .chain(table.metadata.amino_acid_sequences.iter().map(|(name, metadata)| {
                (name.clone(), symbols_to_string(&metadata.reference_sequence))
            }))
            .collect(),
        zstd_dictionaries: table
            .metadata
            .zstd_dictionaries
            .iter()
            .map(|(name, dictionary)| (name.clone(), base64::encode(dictionary.as_bytes())))
            .collect(),
        partition_count: table.partitions.len(),
    };
    let schema_path = dir.join("schema.json");
    let schema_json =
        serde_json::to_vec_pretty(&descriptor).map_err(SaveDatabaseError::BadSchema)?;
    std::fs::write(&schema_path, schema_json).map_err(io_error(&schema_path))?;

    for (idx, partition) in table.partitions.iter().enumerate() {
        let path = dir.join(format!("P{idx}.silo"));
        let mut out = Vec::new();
        write_partition(partition, &mut out).map_err(io_error(&path))?;
        std::fs::write(&path, out).map_err(io_error(&path))?;
    }
    tracing::info!(
        path = %dir.display(),
        partitions = table.partitions.len(),
        rows = table.total_sequence_count(),
        "saved database"
    );
    Ok(())
}

/// Read a whole table back from `dir`.
pub fn load_table(dir: &Path) -> Result<Table, LoadDatabaseError> {
    let schema_path = dir.join("schema.json");
    let io_error = |path: &Path| {
        let path = path.display().to_string();
        move |source| LoadDatabaseError::Io { path: path.clone(), source }
    };
    let schema_json = std::fs::read(&schema_path).map_err(io_error(&schema_path))?;
    let descriptor: SchemaDescriptor =
        serde_json::from_slice(&schema_json).map_err(LoadDatabaseError::BadSchema)?;

    let references: FxHashMap<String, String> = descriptor.references.into_iter().collect();
    let mut zstd_dictionaries = FxHashMap::default();
    for (name, encoded) in descriptor.zstd_dictionaries {
        let bytes = base64::decode(&encoded).map_err(|_| LoadDatabaseError::Corrupt {
            path: schema_path.display().to_string(),
            detail: format!("zstd dictionary of column {name} is not base64"),
        })?;
        zstd_dictionaries.insert(name, ZstdDictionary::new(bytes));
    }
    let mut table = Table::new(descriptor.schema, &references, zstd_dictionaries).map_err(
        |error| LoadDatabaseError::Corrupt {
            path: schema_path.display().to_string(),
            detail: error.to_string(),
        },
    )?;

    for idx in 0..descriptor.partition_count {
        let path = dir.join(format!("P{idx}.silo"));
        let bytes = std::fs::read(&path).map_err(io_error(&path))?;
        let partition_idx = table.create_partition();
        read_partition(&mut table, partition_idx, &bytes, &path)?;
    }
    tracing::info!(
        path = %dir.display(),
        partitions = table.partitions.len(),
        rows = table.total_sequence_count(),
        "loaded database"
    );
    Ok(table)
}

fn symbols_to_string<S: Symbol>(symbols: &[S]) -> String {
    symbols.iter().map(|symbol| symbol.to_char()).collect()
}

fn write_partition(partition: &TablePartition, out: &mut Vec<u8>) -> std::io::Result<()> {
    out.write_all(MAGIC)?;
    out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    out.write_u32::<LittleEndian>(partition.sequence_count)?;
    out.write_u32::<LittleEndian>(partition.columns.columns.len() as u32)?;
    for (identifier, column) in &partition.columns.columns {
        write_str(out, &identifier.name)?;
        let mut section = Vec::new();
        write_column(column, &mut section)?;
        out.write_u64::<LittleEndian>(section.len() as u64)?;
        out.write_all(&section)?;
    }
    Ok(())
}

fn write_column(column: &ColumnPartition, out: &mut Vec<u8>) -> std::io::Result<()> {
    match column {
        ColumnPartition::Bool(column) => {
            for value in &column.values {
                out.write_u8(value.as_byte())?;
            }
        }
        ColumnPartition::Int(column) => {
            for value in &column.values {
                out.write_i32::<LittleEndian>(*value)?;
            }
        }
        ColumnPartition::Float(column) => {
            for value in &column.values {
                out.write_f64::<LittleEndian>(*value)?;
            }
        }
        ColumnPartition::Date(column) => {
            for value in &column.values {
                out.write_i32::<LittleEndian>(value.0)?;
            }
        }
        ColumnPartition::String(column) => {
            for fingerprint in &column.values {
                out.write_all(fingerprint.as_bytes())?;
            }
            // Dump the distinct strings so the interner can be refilled.
            let mut distinct: BTreeMap<[u8; 16], String> = BTreeMap::new();
            for fingerprint in &column.values {
                distinct.entry(fingerprint.0).or_insert_with(|| {
                    column.interner.resolve(fingerprint).unwrap_or_default()
                });
            }
            out.write_u32::<LittleEndian>(distinct.len() as u32)?;
            for value in distinct.values() {
                write_str(out, value)?;
            }
        }
        ColumnPartition::IndexedString(column) => {
            for value_id in &column.values {
                out.write_u32::<LittleEndian>(*value_id)?;
            }
            // Dump the dictionary slice this partition uses; ids are
            // re-assigned at load, so store (old id, value) pairs.
            let mut distinct: BTreeMap<u32, String> = BTreeMap::new();
            for value_id in &column.values {
                distinct.entry(*value_id).or_insert_with(|| {
                    column.dictionary.resolve(*value_id).unwrap_or_default()
                });
            }
            out.write_u32::<LittleEndian>(distinct.len() as u32)?;
            for (value_id, value) in &distinct {
                out.write_u32::<LittleEndian>(*value_id)?;
                write_str(out, value)?;
            }
        }
        ColumnPartition::ZstdString(column) => {
            for value in &column.values {
                match value {
                    Some(bytes) => {
                        out.write_u8(1)?;
                        out.write_u64::<LittleEndian>(bytes.len() as u64)?;
                        out.write_all(bytes)?;
                    }
                    None => out.write_u8(0)?,
                }
            }
        }
        ColumnPartition::NucleotideSequence(column) => write_sequence_column(column, out)?,
        ColumnPartition::AminoAcidSequence(column) => write_sequence_column(column, out)?,
    }
    Ok(())
}

fn write_sequence_column<S: Symbol>(
    column: &SequenceColumnPartition<S>,
    out: &mut Vec<u8>,
) -> std::io::Result<()> {
    write_str(out, &symbols_to_string(&column.local_reference_sequence))?;

    let entries: Vec<_> = column.vertical_index.iter().collect();
    out.write_u64::<LittleEndian>(entries.len() as u64)?;
    for (key, container) in entries {
        out.write_u32::<LittleEndian>(key.position)?;
        out.write_u16::<LittleEndian>(key.v_tile)?;
        out.write_u8(key.symbol.index() as u8)?;
        write_container(container, out)?;
    }

    for (start, end) in &column.coverage_index.start_end {
        out.write_u32::<LittleEndian>(*start)?;
        out.write_u32::<LittleEndian>(*end)?;
    }
    out.write_u32::<LittleEndian>(column.coverage_index.missing_bitmaps.len() as u32)?;
    for (row_id, bitmap) in &column.coverage_index.missing_bitmaps {
        out.write_u32::<LittleEndian>(*row_id)?;
        write_bitmap(bitmap, out)?;
    }

    let insertions: Vec<_> = column.insertion_index.iter().collect();
    out.write_u32::<LittleEndian>(insertions.len() as u32)?;
    for (position, literal, bitmap) in insertions {
        out.write_u32::<LittleEndian>(position)?;
        write_str(out, literal)?;
        write_bitmap(bitmap, out)?;
    }
    Ok(())
}

fn write_container(container: &Container, out: &mut Vec<u8>) -> std::io::Result<()> {
    match container {
        Container::Array(values) => {
            out.write_u8(0)?;
            out.write_u32::<LittleEndian>(values.len() as u32)?;
            for value in values {
                out.write_u16::<LittleEndian>(*value)?;
            }
        }
        Container::Bitset { words, cardinality } => {
            out.write_u8(1)?;
            out.write_u32::<LittleEndian>(*cardinality)?;
            for word in words.iter() {
                out.write_u64::<LittleEndian>(*word)?;
            }
        }
    }
    Ok(())
}

fn write_bitmap(bitmap: &RoaringBitmap, out: &mut Vec<u8>) -> std::io::Result<()> {
    out.write_u64::<LittleEndian>(bitmap.serialized_size() as u64)?;
    bitmap.serialize_into(out)
}

fn write_str(out: &mut Vec<u8>, value: &str) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(value.len() as u32)?;
    out.write_all(value.as_bytes())
}

fn read_partition(
    table: &mut Table,
    partition_idx: usize,
    bytes: &[u8],
    path: &Path,
) -> Result<(), LoadDatabaseError> {
    let path_str = path.display().to_string();
    let corrupt = |detail: String| LoadDatabaseError::Corrupt {
        path: path_str.clone(),
        detail,
    };
    let io = |error: std::io::Error| corrupt(error.to_string());

    let mut input = bytes;
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(io)?;
    if &magic != MAGIC {
        return Err(LoadDatabaseError::BadMagic { path: path_str });
    }
    let version = input.read_u32::<LittleEndian>().map_err(io)?;
    if version != FORMAT_VERSION {
        return Err(LoadDatabaseError::BadVersion {
            path: path_str,
            version,
        });
    }
    let sequence_count = input.read_u32::<LittleEndian>().map_err(io)?;
    let column_count = input.read_u32::<LittleEndian>().map_err(io)?;

    let partition = &mut table.partitions[partition_idx];
    partition.sequence_count = sequence_count;
    if column_count as usize != partition.columns.columns.len() {
        return Err(corrupt(format!(
            "expected {} columns, found {column_count}",
            partition.columns.columns.len()
        )));
    }

    for (identifier, column) in &mut partition.columns.columns {
        let name = read_str(&mut input).map_err(io)?;
        if name != identifier.name {
            return Err(corrupt(format!(
                "expected column {}, found {name}",
                identifier.name
            )));
        }
        let section_len = input.read_u64::<LittleEndian>().map_err(io)? as usize;
        if section_len > input.len() {
            return Err(corrupt(format!("column {name} section is truncated")));
        }
        let (mut section, rest) = input.split_at(section_len);
        input = rest;
        read_column(column, sequence_count, &mut section).map_err(io)?;
    }
    partition.finalize();
    Ok(())
}

fn read_column(
    column: &mut ColumnPartition,
    sequence_count: u32,
    input: &mut &[u8],
) -> std::io::Result<()> {
    match column {
        ColumnPartition::Bool(column) => {
            for _ in 0..sequence_count {
                column.values.push(OptionalBool::from_byte(input.read_u8()?));
            }
        }
        ColumnPartition::Int(column) => {
            for _ in 0..sequence_count {
                column.values.push(input.read_i32::<LittleEndian>()?);
            }
        }
        ColumnPartition::Float(column) => {
            for _ in 0..sequence_count {
                column.values.push(input.read_f64::<LittleEndian>()?);
            }
        }
        ColumnPartition::Date(column) => {
            for _ in 0..sequence_count {
                column
                    .values
                    .push(EncodedDate(input.read_i32::<LittleEndian>()?));
            }
        }
        ColumnPartition::String(column) => {
            for _ in 0..sequence_count {
                let mut fingerprint = [0u8; 16];
                input.read_exact(&mut fingerprint)?;
                column.values.push(SiloString::from_bytes(fingerprint));
            }
            let distinct = input.read_u32::<LittleEndian>()?;
            for _ in 0..distinct {
                let value = read_str(input)?;
                column.interner.intern(&value);
            }
        }
        ColumnPartition::IndexedString(column) => {
            let mut raw_ids = Vec::with_capacity(sequence_count as usize);
            for _ in 0..sequence_count {
                raw_ids.push(input.read_u32::<LittleEndian>()?);
            }
            let distinct = input.read_u32::<LittleEndian>()?;
            let mut remap = FxHashMap::default();
            for _ in 0..distinct {
                let old_id = input.read_u32::<LittleEndian>()?;
                let value = read_str(input)?;
                remap.insert(old_id, column.dictionary.intern(&value));
            }
            for raw_id in raw_ids {
                let new_id = remap.get(&raw_id).copied().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("value id {raw_id} missing from dictionary dump"),
                    )
                })?;
                column.values.push(new_id);
            }
        }
        ColumnPartition::ZstdString(column) => {
            for _ in 0..sequence_count {
                let present = input.read_u8()?;
                if present == 0 {
                    column.values.push(None);
                } else {
                    let len = input.read_u64::<LittleEndian>()? as usize;
                    let mut bytes = vec![0u8; len];
                    input.read_exact(&mut bytes)?;
                    column.values.push(Some(bytes));
                }
            }
        }
        ColumnPartition::NucleotideSequence(column) => {
            read_sequence_column(column, sequence_count, input)?;
        }
        ColumnPartition::AminoAcidSequence(column) => {
            read_sequence_column(column, sequence_count, input)?;
        }
    }
    Ok(())
}

fn read_sequence_column<S: Symbol>(
    column: &mut SequenceColumnPartition<S>,
    sequence_count: u32,
    input: &mut &[u8],
) -> std::io::Result<()> {
    let invalid = |detail: String| std::io::Error::new(std::io::ErrorKind::InvalidData, detail);

    let local_reference = read_str(input)?;
    let mut local_reference_symbols = Vec::with_capacity(local_reference.len());
    for chr in local_reference.chars() {
        local_reference_symbols.push(
            S::from_char(chr)
                .ok_or_else(|| invalid(format!("invalid reference character {chr:?}")))?,
        );
    }

    let mut vertical_index = VerticalSequenceIndex::new();
    let entry_count = input.read_u64::<LittleEndian>()?;
    for _ in 0..entry_count {
        let position = input.read_u32::<LittleEndian>()?;
        let v_tile = input.read_u16::<LittleEndian>()?;
        let symbol_index = input.read_u8()? as usize;
        let symbol = S::from_index(symbol_index)
            .ok_or_else(|| invalid(format!("invalid symbol index {symbol_index}")))?;
        let container = read_container(input)?;
        vertical_index.insert_raw(
            DiffKey {
                position,
                v_tile,
                symbol,
            },
            container,
        );
    }

    let mut coverage_index = HorizontalCoverageIndex::new();
    for _ in 0..sequence_count {
        let start = input.read_u32::<LittleEndian>()?;
        let end = input.read_u32::<LittleEndian>()?;
        coverage_index.insert_coverage(start, end, &[]);
    }
    let missing_count = input.read_u32::<LittleEndian>()?;
    for _ in 0..missing_count {
        let row_id = input.read_u32::<LittleEndian>()?;
        let bitmap = read_bitmap(input)?;
        coverage_index.missing_bitmaps.insert(row_id, bitmap);
    }

    let mut partition = SequenceColumnPartition::from_loaded_parts(
        column.metadata.clone(),
        local_reference_symbols,
        vertical_index,
        coverage_index,
    );

    let insertion_count = input.read_u32::<LittleEndian>()?;
    for _ in 0..insertion_count {
        let position = input.read_u32::<LittleEndian>()?;
        let literal = read_str(input)?;
        let bitmap = read_bitmap(input)?;
        for row_id in bitmap.iter() {
            partition.insertion_index.insert(position, &literal, row_id);
        }
    }

    *column = partition;
    Ok(())
}

fn read_container(input: &mut &[u8]) -> std::io::Result<Container> {
    let tag = input.read_u8()?;
    match tag {
        0 => {
            let len = input.read_u32::<LittleEndian>()?;
            let mut values = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(input.read_u16::<LittleEndian>()?);
            }
            Ok(Container::Array(values))
        }
        1 => {
            let cardinality = input.read_u32::<LittleEndian>()?;
            let mut words = Box::new([0u64; (1 << 16) / 64]);
            for word in words.iter_mut() {
                *word = input.read_u64::<LittleEndian>()?;
            }
            Ok(Container::Bitset { words, cardinality })
        }
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown container tag {tag}"),
        )),
    }
}

fn read_bitmap(input: &mut &[u8]) -> std::io::Result<RoaringBitmap> {
    let len = input.read_u64::<LittleEndian>()? as usize;
    if len > input.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "bitmap section is truncated",
        ));
    }
    let (bytes, rest) = input.split_at(len);
    let bitmap = RoaringBitmap::deserialize_from(bytes)
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
    *input = rest;
    Ok(bitmap)
}

fn read_str(input: &mut &[u8]) -> std::io::Result<String> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    if len > input.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "string is truncated",
        ));
    }
    let (bytes, rest) = input.split_at(len);
    *input = rest;
    String::from_utf8(bytes.to_vec())
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::ColumnIdentifier;
    use serde_json::json;

    fn build_table() -> Table {
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
                    name: "date".to_string(),
                    column_type: ColumnType::Date,
                },
                ColumnIdentifier {
                    name: "unaligned_segment1".to_string(),
                    column_type: ColumnType::ZstdCompressedString,
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
        let mut table = Table::new(schema, &references, FxHashMap::default()).unwrap();
        let partition_idx = table.create_partition();
        let partition = &mut table.partitions[partition_idx];
        partition
            .append_row(&json!({
                "primaryKey": "id_0", "country": "Switzerland", "age": 7,
                "date": "2020-01-01", "unaligned_segment1": "ACGTA",
                "segment1": {"sequence": "ACGT-", "insertions": ["3:A"]},
            }))
            .unwrap();
        partition
            .append_row(&json!({
                "primaryKey": "id_1", "country": "Germany", "age": null,
                "date": null, "unaligned_segment1": null, "segment1": null,
            }))
            .unwrap();
        partition.finalize();
        table
    }

    #[test]
    fn test_round_trip_preserves_rows_and_indexes() {
        let table = build_table();
        let dir = tempfile::tempdir().unwrap();
        save_table(&table, dir.path()).unwrap();
        let loaded = load_table(dir.path()).unwrap();

        assert_eq!(loaded.partitions.len(), 1);
        let partition = &loaded.partitions[0];
        assert_eq!(partition.sequence_count, 2);

        let store = partition.columns.nucleotide_sequence("segment1").unwrap();
        let all = RoaringBitmap::from_iter(0..2u32);
        assert_eq!(store.reconstruct_aligned(&all), ["ACGT-", "NNNNN"]);
        assert!(store.insertion_index.bitmap_for(2, "A").is_some());

        for (identifier, column) in &partition.columns.columns {
            if identifier.column_type.is_sequence() {
                continue;
            }
            let original = table.partitions[0].columns.get(&identifier.name).unwrap();
            for row_id in 0..2u32 {
                assert_eq!(
                    column.value_as_json(row_id).unwrap(),
                    original.value_as_json(row_id).unwrap(),
                    "column {} row {row_id}",
                    identifier.name
                );
            }
        }
    }

    #[test]
    fn test_bad_magic_is_reported() {
        let table = build_table();
        let dir = tempfile::tempdir().unwrap();
        save_table(&table, dir.path()).unwrap();
        std::fs::write(dir.path().join("P0.silo"), b"JUNKJUNKJUNK").unwrap();
        assert!(matches!(
            load_table(dir.path()),
            Err(LoadDatabaseError::BadMagic { .. })
        ));
    }
}
