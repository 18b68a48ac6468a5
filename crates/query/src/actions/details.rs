//! Column projection of the filtered rows.

use std::sync::Arc;

use roaring::RoaringBitmap;
use storage::{ColumnType, Table};

use crate::result::{
    apply_offset_limit, validate_limit_offset, OrderByField, QueryResult, QueryResultEntry,
};
use crate::tuple::{TupleComparator, TupleLayout, TupleWriter};
use crate::QueryError;

const STREAM_BATCH_SIZE: usize = 1024;

fn resolve_fields(table: &Table, fields: &[String]) -> Result<Vec<String>, QueryError> {
    if fields.is_empty() {
        return Ok(table
            .schema
            .metadata_columns()
            .map(|column| column.name.clone())
            .collect());
    }
    for field in fields {
        let column = table
            .schema
            .column(field)
            .ok_or_else(|| QueryError::bad_request(format!("Unknown column {field}")))?;
        if column.column_type.is_sequence() {
            return Err(QueryError::bad_request(format!(
                "Column {field} is a sequence column and cannot be projected by Details"
            )));
        }
    }
    Ok(fields.to_vec())
}

fn project_row(
    table: &Table,
    partition_idx: usize,
    row_id: u32,
    fields: &[String],
) -> Result<QueryResultEntry, QueryError> {
    let partition = &table.partitions[partition_idx];
    let mut entry = QueryResultEntry::default();
    for field in fields {
        let column = partition
            .columns
            .get(field)
            .ok_or_else(|| {
                QueryError::Compilation(format!("column {field} vanished from the partition"))
            })?;
        let value = column
            .value_as_json(row_id)
            .map_err(QueryError::Materialization)?;
        entry.fields.insert(field.clone(), value);
    }
    Ok(entry)
}

pub fn execute(
    table: &Arc<Table>,
    bitmaps: Vec<RoaringBitmap>,
    fields: &[String],
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
    randomize_seed: Option<u64>,
) -> Result<QueryResult, QueryError> {
    // Details output always has a well-defined order: the requested one,
    // or ascending (partition, row id).
    validate_limit_offset(true, limit, offset)?;
    let fields = resolve_fields(table, fields)?;

    if order_by_fields.is_empty() {
        return Ok(stream_in_row_order(
            table.clone(),
            bitmaps,
            fields,
            limit,
            offset,
        ));
    }

    // Materialize sort keys as packed tuples, sort row handles, then
    // project in final order.
    let order_by_columns: Vec<String> = order_by_fields
        .iter()
        .map(|field| field.field.clone())
        .collect();
    for column in &order_by_columns {
        let identifier = table
            .schema
            .column(column)
            .ok_or_else(|| QueryError::bad_request(format!("Unknown column {column}")))?;
        if matches!(
            identifier.column_type,
            ColumnType::ZstdCompressedString
                | ColumnType::NucleotideSequence
                | ColumnType::AminoAcidSequence
        ) {
            return Err(QueryError::bad_request(format!(
                "Cannot order by column {column}"
            )));
        }
    }
    let layout = TupleLayout::new(table, &order_by_columns)?;
    let comparator = TupleComparator::new(&layout, order_by_fields, randomize_seed)?;

    let writers = table
        .partitions
        .iter()
        .map(|partition| TupleWriter::new(layout.clone(), partition))
        .collect::<Result<Vec<_>, _>>()?;

    let mut handles: Vec<(Vec<u8>, usize, u32)> = Vec::new();
    for (partition_idx, bitmap) in bitmaps.iter().enumerate() {
        let writer = &writers[partition_idx];
        let mut packed = Vec::new();
        for row_id in bitmap.iter() {
            writer.fill(row_id, &mut packed);
            handles.push((std::mem::take(&mut packed), partition_idx, row_id));
        }
    }
    handles.sort_by(|(left, _, _), (right, _, _)| comparator.compare(&layout, left, right));

    let entries = handles
        .into_iter()
        .map(|(_, partition_idx, row_id)| project_row(table, partition_idx, row_id, &fields))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QueryResult::from_vec(apply_offset_limit(
        entries, limit, offset,
    )))
}

/// Stream rows in ascending (partition, row id) order, applying offset
/// and limit on the fly.
fn stream_in_row_order(
    table: Arc<Table>,
    bitmaps: Vec<RoaringBitmap>,
    fields: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> QueryResult {
    // Row handles per partition; the generator drains them batch-wise.
    let mut pending: std::collections::VecDeque<(usize, Vec<u32>)> = bitmaps
        .into_iter()
        .enumerate()
        .map(|(partition_idx, bitmap)| (partition_idx, bitmap.iter().collect()))
        .collect();
    let mut to_skip = offset.unwrap_or(0);
    let mut remaining = limit.unwrap_or(u64::MAX);
    let mut within_partition = 0usize;

    QueryResult::from_generator(move |chunk| {
        while chunk.len() < STREAM_BATCH_SIZE && remaining > 0 {
            let Some((partition_idx, rows)) = pending.front() else {
                return Ok(());
            };
            let partition_idx = *partition_idx;
            let Some(row_id) = rows.get(within_partition).copied() else {
                pending.pop_front();
                within_partition = 0;
                continue;
            };
            within_partition += 1;
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            chunk.push(project_row(&table, partition_idx, row_id, &fields)?);
            remaining -= 1;
        }
        Ok(())
    })
}
