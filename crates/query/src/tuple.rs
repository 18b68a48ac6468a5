//! Runtime-described packed rows, the hash and sort keys of group-by
//! and order-by.
//!
//! A tuple is the concatenation of the packed column encodings in
//! columns-descriptor order: BOOL 1 byte, INT/DATE 4 bytes,
//! INDEXED_STRING 4 bytes, FLOAT 8 bytes, STRING the 16-byte
//! fingerprint. Equality and hashing operate on the raw bytes; ordering
//! is typed per field.

use std::cmp::Ordering;
use std::sync::Arc;

use bumpalo::Bump;
use serde_json::Value;
use storage::column::{ColumnPartition, Dictionary, EncodedDate, OptionalBool};
use storage::{ColumnIdentifier, ColumnType, Interner, SiloString, Table, TablePartition};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::result::OrderByField;
use crate::QueryError;

/// How one field is packed and decoded.
#[derive(Clone, Debug)]
enum FieldCodec {
    Bool,
    Int,
    Float,
    Date,
    String(Arc<Interner>),
    IndexedString(Arc<Dictionary>),
}

impl FieldCodec {
    fn size(&self) -> usize {
        match self {
            FieldCodec::Bool => 1,
            FieldCodec::Int | FieldCodec::Date | FieldCodec::IndexedString(_) => 4,
            FieldCodec::Float => 8,
            FieldCodec::String(_) => 16,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TupleFieldLayout {
    pub identifier: ColumnIdentifier,
    pub offset: usize,
    codec: FieldCodec,
}

/// The packed layout of a column projection, shared by all partitions.
#[derive(Clone, Debug)]
pub struct TupleLayout {
    pub fields: Vec<TupleFieldLayout>,
    pub tuple_size: usize,
}

impl TupleLayout {
    /// Describe the projection of `field_names`. Only metadata columns
    /// with a fixed-width packing participate in tuples.
    pub fn new(table: &Table, field_names: &[String]) -> Result<TupleLayout, QueryError> {
        let mut fields = Vec::with_capacity(field_names.len());
        let mut offset = 0usize;
        for name in field_names {
            let identifier = table.schema.column(name).ok_or_else(|| {
                QueryError::bad_request(format!("Unknown column {name}"))
            })?;
            let codec = match identifier.column_type {
                ColumnType::Bool => FieldCodec::Bool,
                ColumnType::Int => FieldCodec::Int,
                ColumnType::Float => FieldCodec::Float,
                ColumnType::Date => FieldCodec::Date,
                ColumnType::String => {
                    FieldCodec::String(table.metadata.interners[name].clone())
                }
                ColumnType::IndexedString => {
                    FieldCodec::IndexedString(table.metadata.dictionaries[name].clone())
                }
                ColumnType::ZstdCompressedString
                | ColumnType::NucleotideSequence
                | ColumnType::AminoAcidSequence => {
                    return Err(QueryError::bad_request(format!(
                        "Column {name} cannot be used for grouping or ordering"
                    )))
                }
            };
            let size = codec.size();
            fields.push(TupleFieldLayout {
                identifier: identifier.clone(),
                offset,
                codec,
            });
            offset += size;
        }
        Ok(TupleLayout {
            fields,
            tuple_size: offset,
        })
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.identifier.name == name)
    }

    fn field_bytes<'t>(&self, field_idx: usize, tuple: &'t [u8]) -> &'t [u8] {
        let field = &self.fields[field_idx];
        &tuple[field.offset..field.offset + field.codec.size()]
    }

    /// Decode one field back into its JSON value.
    pub fn decode_field(&self, field_idx: usize, tuple: &[u8]) -> Value {
        let bytes = self.field_bytes(field_idx, tuple);
        match &self.fields[field_idx].codec {
            FieldCodec::Bool => match OptionalBool::from_byte(bytes[0]).value() {
                Some(value) => Value::Bool(value),
                None => Value::Null,
            },
            FieldCodec::Int => {
                let raw = i32::from_le_bytes(bytes.try_into().expect("4-byte field"));
                if raw == i32::MIN {
                    Value::Null
                } else {
                    Value::from(raw)
                }
            }
            FieldCodec::Float => {
                let raw = f64::from_le_bytes(bytes.try_into().expect("8-byte field"));
                if raw.is_nan() {
                    Value::Null
                } else {
                    Value::from(raw)
                }
            }
            FieldCodec::Date => {
                let raw = i32::from_le_bytes(bytes.try_into().expect("4-byte field"));
                match EncodedDate(raw).format() {
                    Some(date) => Value::String(date),
                    None => Value::Null,
                }
            }
            FieldCodec::String(interner) => {
                let fingerprint = SiloString::from_bytes(bytes.try_into().expect("16-byte field"));
                let resolved = interner.resolve(&fingerprint).unwrap_or_default();
                if resolved.is_empty() {
                    Value::Null
                } else {
                    Value::String(resolved)
                }
            }
            FieldCodec::IndexedString(dictionary) => {
                let raw = u32::from_le_bytes(bytes.try_into().expect("4-byte field"));
                let resolved = dictionary.resolve(raw).unwrap_or_default();
                if resolved.is_empty() {
                    Value::Null
                } else {
                    Value::String(resolved)
                }
            }
        }
    }

    /// Decode a whole tuple into `{field name → value}` pairs.
    pub fn decode(&self, tuple: &[u8]) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .enumerate()
            .map(|(idx, field)| (field.identifier.name.clone(), self.decode_field(idx, tuple)))
            .collect()
    }

    /// Order two packed tuples on one field. Nulls compare greatest, so
    /// they land last ascending and first descending.
    pub fn compare_field(&self, field_idx: usize, left: &[u8], right: &[u8]) -> Ordering {
        let left_bytes = self.field_bytes(field_idx, left);
        let right_bytes = self.field_bytes(field_idx, right);
        match &self.fields[field_idx].codec {
            FieldCodec::Bool => {
                let decode = |bytes: &[u8]| {
                    let byte = bytes[0];
                    (byte == 0x00, byte)
                };
                decode(left_bytes).cmp(&decode(right_bytes))
            }
            FieldCodec::Int | FieldCodec::Date => {
                let decode = |bytes: &[u8]| {
                    let raw = i32::from_le_bytes(bytes.try_into().expect("4-byte field"));
                    let null = match &self.fields[field_idx].codec {
                        FieldCodec::Date => raw == 0,
                        _ => raw == i32::MIN,
                    };
                    (null, raw)
                };
                decode(left_bytes).cmp(&decode(right_bytes))
            }
            FieldCodec::Float => {
                let left_raw = f64::from_le_bytes(left_bytes.try_into().expect("8-byte field"));
                let right_raw = f64::from_le_bytes(right_bytes.try_into().expect("8-byte field"));
                match (left_raw.is_nan(), right_raw.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => left_raw
                        .partial_cmp(&right_raw)
                        .expect("both values are numbers"),
                }
            }
            FieldCodec::String(interner) => {
                let left_fp = SiloString::from_bytes(left_bytes.try_into().expect("16 bytes"));
                let right_fp = SiloString::from_bytes(right_bytes.try_into().expect("16 bytes"));
                let null_fp = SiloString::new("");
                match (left_fp == null_fp, right_fp == null_fp) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => interner.compare(&left_fp, &right_fp),
                }
            }
            FieldCodec::IndexedString(dictionary) => {
                let decode = |bytes: &[u8]| {
                    let raw = u32::from_le_bytes(bytes.try_into().expect("4-byte field"));
                    (raw == 0, dictionary.resolve(raw).unwrap_or_default())
                };
                decode(left_bytes).cmp(&decode(right_bytes))
            }
        }
    }
}

/// Fills packed tuples from one partition's columns.
pub struct TupleWriter<'p> {
    layout: TupleLayout,
    columns: Vec<&'p ColumnPartition>,
}

impl<'p> TupleWriter<'p> {
    pub fn new(
        layout: TupleLayout,
        partition: &'p TablePartition,
    ) -> Result<TupleWriter<'p>, QueryError> {
        let columns = layout
            .fields
            .iter()
            .map(|field| {
                partition
                    .columns
                    .get(&field.identifier.name)
                    .ok_or_else(|| {
                        QueryError::Compilation(format!(
                            "column {} vanished between schema and partition",
                            field.identifier.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TupleWriter { layout, columns })
    }

    pub fn layout(&self) -> &TupleLayout {
        &self.layout
    }

    /// Pack `row_id` into `out`, replacing its contents.
    pub fn fill(&self, row_id: u32, out: &mut Vec<u8>) {
        out.clear();
        let row = row_id as usize;
        for (field, column) in self.layout.fields.iter().zip(&self.columns) {
            match (&field.codec, column) {
                (FieldCodec::Bool, ColumnPartition::Bool(column)) => {
                    out.push(column.values[row].as_byte());
                }
                (FieldCodec::Int, ColumnPartition::Int(column)) => {
                    out.extend_from_slice(&column.values[row].to_le_bytes());
                }
                (FieldCodec::Float, ColumnPartition::Float(column)) => {
                    out.extend_from_slice(&column.values[row].to_le_bytes());
                }
                (FieldCodec::Date, ColumnPartition::Date(column)) => {
                    out.extend_from_slice(&column.values[row].0.to_le_bytes());
                }
                (FieldCodec::String(_), ColumnPartition::String(column)) => {
                    out.extend_from_slice(column.values[row].as_bytes());
                }
                (FieldCodec::IndexedString(_), ColumnPartition::IndexedString(column)) => {
                    out.extend_from_slice(&column.values[row].to_le_bytes());
                }
                _ => unreachable!("layout and partition columns are type-checked together"),
            }
        }
    }
}

/// Owns the arena behind one partition's tuples and hands out packed
/// views into it.
pub struct TupleFactory<'p> {
    writer: TupleWriter<'p>,
    arena: Bump,
    scratch: std::cell::RefCell<Vec<u8>>,
}

impl<'p> TupleFactory<'p> {
    pub fn new(writer: TupleWriter<'p>) -> TupleFactory<'p> {
        TupleFactory {
            writer,
            arena: Bump::new(),
            scratch: std::cell::RefCell::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> &TupleLayout {
        self.writer.layout()
    }

    /// Pack `row_id` into a fresh arena-backed tuple.
    pub fn allocate_one(&self, row_id: u32) -> &[u8] {
        let mut scratch = self.scratch.borrow_mut();
        self.writer.fill(row_id, &mut scratch);
        self.arena.alloc_slice_copy(&scratch)
    }

    /// Allocate `count` zeroed tuples. The caller must `overwrite`
    /// every one of them before reading.
    pub fn allocate_many(&self, count: usize) -> Vec<&mut [u8]> {
        (0..count)
            .map(|_| {
                self.arena
                    .alloc_slice_fill_copy(self.writer.layout().tuple_size, 0u8)
            })
            .collect()
    }

    /// Re-pack `row_id` over an existing tuple buffer.
    pub fn overwrite(&self, tuple: &mut [u8], row_id: u32) {
        let mut scratch = self.scratch.borrow_mut();
        self.writer.fill(row_id, &mut scratch);
        tuple.copy_from_slice(&scratch);
    }

    /// Copy a tuple (possibly from another factory) into this arena.
    pub fn copy_tuple(&self, tuple: &[u8]) -> &[u8] {
        self.arena.alloc_slice_copy(tuple)
    }

    /// Pack into the reusable scratch buffer and run `with` on it, for
    /// hash-table probes that usually do not need a fresh allocation.
    pub fn with_packed<R>(&self, row_id: u32, with: impl FnOnce(&[u8]) -> R) -> R {
        let mut scratch = self.scratch.borrow_mut();
        self.writer.fill(row_id, &mut scratch);
        with(&scratch)
    }
}

/// Compares packed tuples by the order-by fields, breaking ties with a
/// seeded hash of the whole buffer when randomization is requested.
pub struct TupleComparator {
    fields: Vec<(usize, bool)>,
    randomize_seed: Option<u64>,
}

impl TupleComparator {
    pub fn new(
        layout: &TupleLayout,
        order_by: &[OrderByField],
        randomize_seed: Option<u64>,
    ) -> Result<TupleComparator, QueryError> {
        let fields = order_by
            .iter()
            .map(|order_by_field| {
                layout
                    .field_index(&order_by_field.field)
                    .map(|idx| (idx, order_by_field.ascending))
                    .ok_or_else(|| {
                        QueryError::bad_request(format!(
                            "Cannot order by {}: the field is not part of the result",
                            order_by_field.field
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TupleComparator {
            fields,
            randomize_seed,
        })
    }

    pub fn compare(&self, layout: &TupleLayout, left: &[u8], right: &[u8]) -> Ordering {
        for (field_idx, ascending) in &self.fields {
            let ordering = layout.compare_field(*field_idx, left, right);
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        if let Some(seed) = self.randomize_seed {
            let ordering = xxh3_64_with_seed(left, seed).cmp(&xxh3_64_with_seed(right, seed));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left.cmp(right)
    }
}
