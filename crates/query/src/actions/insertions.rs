//! Counts of inserted substrings within the filtered rows.

use std::sync::Arc;

use roaring::RoaringBitmap;
use serde_json::Value;
use storage::column::ColumnPartition;
use storage::Table;

use crate::error::check_query;
use crate::result::{
    apply_offset_limit, sort_entries, validate_limit_offset, OrderByField, QueryResult,
    QueryResultEntry,
};
use crate::QueryError;

const POSITION_FIELD: &str = "position";
const INSERTED_SYMBOLS_FIELD: &str = "insertedSymbols";
const SEQUENCE_NAME_FIELD: &str = "sequenceName";
const COUNT_FIELD: &str = "count";

pub fn execute(
    table: &Arc<Table>,
    bitmaps: &[RoaringBitmap],
    sequence_names: &[String],
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<QueryResult, QueryError> {
    // The output is generated in (sequence, position, literal) order,
    // which is a total order.
    validate_limit_offset(true, limit, offset)?;
    for order_by_field in order_by_fields {
        check_query!(
            [
                POSITION_FIELD,
                INSERTED_SYMBOLS_FIELD,
                SEQUENCE_NAME_FIELD,
                COUNT_FIELD
            ]
            .contains(&order_by_field.field.as_str()),
            "Cannot order by {}: the field is not part of the insertion output",
            order_by_field.field
        );
    }

    let names: Vec<String> = if sequence_names.is_empty() {
        table
            .schema
            .columns
            .iter()
            .filter(|column| column.column_type.is_sequence())
            .map(|column| column.name.clone())
            .collect()
    } else {
        for name in sequence_names {
            let known = table
                .schema
                .column(name)
                .is_some_and(|column| column.column_type.is_sequence());
            check_query!(known, "Unknown sequence name {name}");
        }
        sequence_names.to_vec()
    };

    let mut entries = Vec::new();
    for name in &names {
        // (position, literal) → count across partitions.
        let mut tallies: std::collections::BTreeMap<(u32, String), u64> =
            std::collections::BTreeMap::new();
        for (partition, filter) in table.partitions.iter().zip(bitmaps) {
            let insertion_index = match partition.columns.get(name) {
                Some(ColumnPartition::NucleotideSequence(store)) => &store.insertion_index,
                Some(ColumnPartition::AminoAcidSequence(store)) => &store.insertion_index,
                _ => continue,
            };
            for (position, literal, rows) in insertion_index.iter() {
                let count = rows.intersection_len(filter);
                if count > 0 {
                    *tallies.entry((position, literal.to_string())).or_default() += count;
                }
            }
        }
        for ((position, literal), count) in tallies {
            let mut entry = QueryResultEntry::default();
            entry
                .fields
                .insert(POSITION_FIELD.to_string(), Value::from(position + 1));
            entry.fields.insert(
                INSERTED_SYMBOLS_FIELD.to_string(),
                Value::String(literal),
            );
            entry.fields.insert(
                SEQUENCE_NAME_FIELD.to_string(),
                Value::String(name.clone()),
            );
            entry
                .fields
                .insert(COUNT_FIELD.to_string(), Value::from(count));
            entries.push(entry);
        }
    }

    sort_entries(&mut entries, order_by_fields, None);
    Ok(QueryResult::from_vec(apply_offset_limit(
        entries, limit, offset,
    )))
}
