//! Group-by counting.

use std::cmp::Ordering;
use std::sync::Arc;

use fxhash::FxHashMap;
use roaring::RoaringBitmap;
use serde_json::Value;
use storage::Table;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::result::{
    apply_offset_limit, validate_limit_offset, OrderByField, QueryResult, QueryResultEntry,
};
use crate::tuple::{TupleFactory, TupleLayout, TupleWriter};
use crate::QueryError;

const COUNT_FIELD: &str = "count";

pub fn execute(
    table: &Arc<Table>,
    bitmaps: &[RoaringBitmap],
    group_by_fields: &[String],
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
    randomize_seed: Option<u64>,
) -> Result<QueryResult, QueryError> {
    validate_limit_offset(!order_by_fields.is_empty(), limit, offset)?;

    if group_by_fields.is_empty() {
        for order_by_field in order_by_fields {
            if order_by_field.field != COUNT_FIELD {
                return Err(QueryError::bad_request(format!(
                    "Cannot order by {}: without groupByFields the only output field is count",
                    order_by_field.field
                )));
            }
        }
        let count: u64 = bitmaps.iter().map(|bitmap| bitmap.len()).sum();
        let mut entry = QueryResultEntry::default();
        entry.fields.insert(COUNT_FIELD.to_string(), Value::from(count));
        let entries = apply_offset_limit(vec![entry], limit, offset);
        return Ok(QueryResult::from_vec(entries));
    }

    let layout = TupleLayout::new(table, group_by_fields)?;
    for order_by_field in order_by_fields {
        if order_by_field.field != COUNT_FIELD
            && layout.field_index(&order_by_field.field).is_none()
        {
            return Err(QueryError::bad_request(format!(
                "Cannot order by {}: the field is not part of the groupByFields",
                order_by_field.field
            )));
        }
    }

    // Count per packed group tuple. Keys are arena slices owned by the
    // per-partition factories, which outlive the map.
    let factories = table
        .partitions
        .iter()
        .map(|partition| {
            TupleWriter::new(layout.clone(), partition).map(TupleFactory::new)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: FxHashMap<&[u8], u64> = FxHashMap::default();
    for (factory, bitmap) in factories.iter().zip(bitmaps) {
        for row_id in bitmap.iter() {
            let found = factory.with_packed(row_id, |packed| {
                if let Some(count) = groups.get_mut(packed) {
                    *count += 1;
                    true
                } else {
                    false
                }
            });
            if !found {
                groups.insert(factory.allocate_one(row_id), 1);
            }
        }
    }

    let mut grouped: Vec<(&[u8], u64)> = groups.into_iter().collect();
    grouped.sort_by(|(left_tuple, left_count), (right_tuple, right_count)| {
        for order_by_field in order_by_fields {
            let ordering = if order_by_field.field == COUNT_FIELD {
                left_count.cmp(right_count)
            } else {
                let field_idx = layout
                    .field_index(&order_by_field.field)
                    .expect("validated above");
                layout.compare_field(field_idx, left_tuple, right_tuple)
            };
            let ordering = if order_by_field.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        if let Some(seed) = randomize_seed {
            let ordering = xxh3_64_with_seed(left_tuple, seed)
                .cmp(&xxh3_64_with_seed(right_tuple, seed));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left_tuple.cmp(right_tuple)
    });

    let entries: Vec<QueryResultEntry> = grouped
        .into_iter()
        .map(|(tuple, count)| {
            let mut fields = layout.decode(tuple);
            fields.insert(COUNT_FIELD.to_string(), Value::from(count));
            QueryResultEntry { fields }
        })
        .collect();
    Ok(QueryResult::from_vec(apply_offset_limit(
        entries, limit, offset,
    )))
}
