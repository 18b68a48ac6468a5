//! Sequence reconstruction for the filtered rows.
//!
//! `FastaAligned` rebuilds the aligned sequence from the indexes: the
//! partition's local reference, overwritten with the vertical diffs and
//! masked by coverage. `Fasta` instead reads the unaligned companion
//! column `unaligned_<name>` (zstd-compressed).

use std::sync::Arc;

use roaring::RoaringBitmap;
use serde_json::Value;
use storage::column::ColumnPartition;
use storage::{ColumnType, Table};

use crate::error::check_query;
use crate::result::{
    apply_offset_limit, sort_entries, validate_limit_offset, OrderByField, QueryResult,
    QueryResultEntry,
};
use crate::QueryError;

#[allow(clippy::too_many_arguments)]
pub fn execute(
    table: &Arc<Table>,
    bitmaps: &[RoaringBitmap],
    sequence_names: &[String],
    additional_fields: &[String],
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
    randomize_seed: Option<u64>,
    aligned: bool,
) -> Result<QueryResult, QueryError> {
    // Without orderByFields the output is in (partition, row id) order.
    validate_limit_offset(true, limit, offset)?;
    check_query!(
        !sequence_names.is_empty(),
        "The field 'sequenceNames' must name at least one sequence"
    );
    for name in sequence_names {
        let known = table
            .schema
            .column(name)
            .is_some_and(|column| column.column_type.is_sequence());
        check_query!(known, "Unknown sequence name {name}");
        if !aligned {
            let unaligned = unaligned_column_name(name);
            let known = table.schema.column(&unaligned).is_some_and(|column| {
                column.column_type == ColumnType::ZstdCompressedString
            });
            check_query!(
                known,
                "Sequence {name} has no unaligned companion column {unaligned}"
            );
        }
    }
    let primary_key = &table.schema.primary_key;
    for field in additional_fields {
        let column = table
            .schema
            .column(field)
            .ok_or_else(|| QueryError::bad_request(format!("Unknown column {field}")))?;
        check_query!(
            !column.column_type.is_sequence(),
            "Column {field} is a sequence column; list it in sequenceNames instead"
        );
    }
    for order_by_field in order_by_fields {
        let known = order_by_field.field == *primary_key
            || additional_fields.contains(&order_by_field.field);
        check_query!(
            known,
            "Cannot order by {}: the field is not part of the result",
            order_by_field.field
        );
    }

    let mut entries = Vec::new();
    for (partition, filter) in table.partitions.iter().zip(bitmaps) {
        let mut partition_entries: Vec<QueryResultEntry> = filter
            .iter()
            .map(|row_id| {
                let mut entry = QueryResultEntry::default();
                let key_column = partition.columns.get(primary_key).ok_or_else(|| {
                    QueryError::Compilation("primary key column missing from partition".into())
                })?;
                entry.fields.insert(
                    primary_key.clone(),
                    key_column
                        .value_as_json(row_id)
                        .map_err(QueryError::Materialization)?,
                );
                for field in additional_fields {
                    let column = partition.columns.get(field).ok_or_else(|| {
                        QueryError::Compilation(format!("column {field} missing from partition"))
                    })?;
                    entry.fields.insert(
                        field.clone(),
                        column
                            .value_as_json(row_id)
                            .map_err(QueryError::Materialization)?,
                    );
                }
                Ok(entry)
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        for name in sequence_names {
            if aligned {
                let sequences = match partition.columns.get(name) {
                    Some(ColumnPartition::NucleotideSequence(store)) => {
                        store.reconstruct_aligned(filter)
                    }
                    Some(ColumnPartition::AminoAcidSequence(store)) => {
                        store.reconstruct_aligned(filter)
                    }
                    _ => {
                        return Err(QueryError::Compilation(format!(
                            "sequence column {name} missing from partition"
                        )))
                    }
                };
                for (entry, sequence) in partition_entries.iter_mut().zip(sequences) {
                    entry.fields.insert(name.clone(), Value::String(sequence));
                }
            } else {
                let unaligned = unaligned_column_name(name);
                let Some(ColumnPartition::ZstdString(column)) =
                    partition.columns.get(&unaligned)
                else {
                    return Err(QueryError::Compilation(format!(
                        "column {unaligned} missing from partition"
                    )));
                };
                for (entry, row_id) in partition_entries.iter_mut().zip(filter.iter()) {
                    let value = column
                        .value(row_id)
                        .map_err(QueryError::Materialization)?
                        .map(Value::String)
                        .unwrap_or(Value::Null);
                    entry.fields.insert(name.clone(), value);
                }
            }
        }
        entries.append(&mut partition_entries);
    }

    sort_entries(&mut entries, order_by_fields, randomize_seed);
    Ok(QueryResult::from_vec(apply_offset_limit(
        entries, limit, offset,
    )))
}

fn unaligned_column_name(sequence_name: &str) -> String {
    format!("unaligned_{sequence_name}")
}
