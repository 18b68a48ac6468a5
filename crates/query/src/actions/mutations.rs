//! Per-position mutation tallies over the filtered rows.

use std::sync::Arc;

use alphabet::{AminoAcid, Nucleotide, Symbol, SymbolMap};
use roaring::RoaringBitmap;
use serde_json::Value;
use storage::column::SequenceColumnPartition;
use storage::Table;

use crate::error::check_query;
use crate::result::{
    apply_offset_limit, sort_entries, validate_limit_offset, OrderByField, QueryResult,
    QueryResultEntry,
};
use crate::QueryError;

pub const DEFAULT_MIN_PROPORTION: f64 = 0.05;

const MUTATION_FIELD: &str = "mutation";
const PROPORTION_FIELD: &str = "proportion";
const COUNT_FIELD: &str = "count";
const SEQUENCE_NAME_FIELD: &str = "sequenceName";

pub fn execute_nucleotide(
    table: &Arc<Table>,
    bitmaps: &[RoaringBitmap],
    sequence_name: Option<&str>,
    min_proportion: Option<f64>,
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<QueryResult, QueryError> {
    let name = match sequence_name {
        Some(name) => name.to_string(),
        None => table
            .schema
            .default_nucleotide_sequence
            .clone()
            .ok_or_else(|| {
                QueryError::bad_request(
                    "The database has no default nucleotide sequence; provide sequenceName",
                )
            })?,
    };
    let min_proportion = validated_min_proportion(min_proportion)?;
    let entries = mutation_entries::<Nucleotide>(table, bitmaps, &name, min_proportion, |partition| {
        partition.columns.nucleotide_sequence(&name)
    })?;
    finish(entries, order_by_fields, limit, offset)
}

pub fn execute_amino_acid(
    table: &Arc<Table>,
    bitmaps: &[RoaringBitmap],
    sequence_names: &[String],
    min_proportion: Option<f64>,
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<QueryResult, QueryError> {
    let names: Vec<String> = if sequence_names.is_empty() {
        vec![table
            .schema
            .default_amino_acid_sequence
            .clone()
            .ok_or_else(|| {
                QueryError::bad_request(
                    "The database has no default amino-acid sequence; provide sequenceNames",
                )
            })?]
    } else {
        sequence_names.to_vec()
    };
    let min_proportion = validated_min_proportion(min_proportion)?;
    let mut entries = Vec::new();
    for name in &names {
        entries.extend(mutation_entries::<AminoAcid>(
            table,
            bitmaps,
            name,
            min_proportion,
            |partition| partition.columns.amino_acid_sequence(name),
        )?);
    }
    finish(entries, order_by_fields, limit, offset)
}

fn validated_min_proportion(min_proportion: Option<f64>) -> Result<f64, QueryError> {
    let min_proportion = min_proportion.unwrap_or(DEFAULT_MIN_PROPORTION);
    check_query!(
        min_proportion > 0.0 && min_proportion <= 1.0,
        "The minProportion must be within (0, 1], got {min_proportion}"
    );
    Ok(min_proportion)
}

fn finish(
    mut entries: Vec<QueryResultEntry>,
    order_by_fields: &[OrderByField],
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<QueryResult, QueryError> {
    // The generation order (sequence, position, symbol) is already a
    // total order, so limit/offset are meaningful without orderByFields.
    validate_limit_offset(true, limit, offset)?;
    for order_by_field in order_by_fields {
        check_query!(
            [
                MUTATION_FIELD,
                PROPORTION_FIELD,
                COUNT_FIELD,
                SEQUENCE_NAME_FIELD
            ]
            .contains(&order_by_field.field.as_str()),
            "Cannot order by {}: the field is not part of the mutation output",
            order_by_field.field
        );
    }
    sort_entries(&mut entries, order_by_fields, None);
    Ok(QueryResult::from_vec(apply_offset_limit(
        entries, limit, offset,
    )))
}

/// Count, within the filtered set of every partition, the rows per
/// (position, symbol) and emit entries over the minimum proportion.
fn mutation_entries<'t, S: Symbol>(
    table: &'t Arc<Table>,
    bitmaps: &[RoaringBitmap],
    sequence_name: &str,
    min_proportion: f64,
    store_of: impl Fn(&'t storage::TablePartition) -> Option<&'t SequenceColumnPartition<S>>,
) -> Result<Vec<QueryResultEntry>, QueryError> {
    let stores: Vec<&SequenceColumnPartition<S>> = table
        .partitions
        .iter()
        .map(|partition| {
            store_of(partition).ok_or_else(|| {
                QueryError::bad_request(format!(
                    "Unknown {} sequence {sequence_name}",
                    S::NAME
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let reference = match stores.first() {
        Some(store) => &store.metadata.reference_sequence,
        None => return Ok(Vec::new()),
    };

    let mut entries = Vec::new();
    for position in 0..reference.len() as u32 {
        let mut counts: SymbolMap<S, u64> = SymbolMap::default();
        let mut covered_total = 0u64;

        for (store, filter) in stores.iter().zip(bitmaps) {
            // A full-partition filter skips the per-row intersection.
            let full_filter = filter.len() == store.sequence_count() as u64;

            let covered = store.coverage_index.covered_bitmap(position);
            let covered_in_filter = if full_filter {
                covered.len()
            } else {
                (covered & filter).len()
            };
            covered_total += covered_in_filter;

            let mut diff_total = 0u64;
            for (key, container) in store.vertical_index.range(position) {
                let in_filter = if full_filter {
                    container.cardinality() as u64
                } else {
                    let base = (key.v_tile as u32) << 16;
                    container
                        .iter()
                        .filter(|low| filter.contains(base | *low as u32))
                        .count() as u64
                };
                counts[key.symbol] += in_filter;
                diff_total += in_filter;
            }
            counts[store.local_reference(position)] += covered_in_filter - diff_total;
        }

        if covered_total == 0 {
            continue;
        }
        let reference_symbol = reference[position as usize];
        for symbol in S::VALID_MUTATION_SYMBOLS {
            if *symbol == reference_symbol || counts[*symbol] == 0 {
                continue;
            }
            let proportion = counts[*symbol] as f64 / covered_total as f64;
            if proportion < min_proportion {
                continue;
            }
            let mut entry = QueryResultEntry::default();
            entry.fields.insert(
                MUTATION_FIELD.to_string(),
                Value::String(format!(
                    "{}{}{}",
                    reference_symbol.to_char(),
                    position + 1,
                    symbol.to_char()
                )),
            );
            entry
                .fields
                .insert(PROPORTION_FIELD.to_string(), Value::from(proportion));
            entry
                .fields
                .insert(COUNT_FIELD.to_string(), Value::from(counts[*symbol]));
            entry.fields.insert(
                SEQUENCE_NAME_FIELD.to_string(),
                Value::String(sequence_name.to_string()),
            );
            entries.push(entry);
        }
    }
    Ok(entries)
}
