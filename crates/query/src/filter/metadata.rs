//! Compilation of the metadata-column filters: dates, numbers,
//! booleans, strings and lineages.

use roaring::RoaringBitmap;
use storage::column::{ColumnPartition, EncodedDate, OptionalBool};
use storage::{SiloString, TablePartition};

use crate::error::check_query;
use crate::operators::{Comparator, Operator, OperatorResult, Predicate};
use crate::QueryError;

fn column<'a>(
    partition: &'a TablePartition,
    name: &str,
) -> Result<&'a ColumnPartition, QueryError> {
    partition
        .columns
        .get(name)
        .ok_or_else(|| QueryError::bad_request(format!("Unknown column {name}")))
}

fn selection(predicates: Vec<Predicate<'_>>, row_count: u32) -> Operator<'_> {
    Operator::Selection {
        child: None,
        predicates,
        row_count,
    }
}

pub fn compile_date_between<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Operator<'a>, QueryError> {
    let ColumnPartition::Date(date_column) = column(partition, column_name)? else {
        return Err(QueryError::bad_request(format!(
            "Column {column_name} is not a DATE column"
        )));
    };
    let parse = |bound: &str| {
        EncodedDate::parse(bound).ok_or_else(|| {
            QueryError::bad_request(format!(
                "Cannot parse {bound:?} as a date, expected YYYY-MM-DD"
            ))
        })
    };
    let mut predicates = Vec::new();
    if let Some(from) = from {
        predicates.push(Predicate::Date {
            values: &date_column.values,
            comparator: Comparator::GreaterOrEqual,
            value: parse(from)?,
        });
    }
    if let Some(to) = to {
        predicates.push(Predicate::Date {
            values: &date_column.values,
            comparator: Comparator::LessOrEqual,
            value: parse(to)?,
        });
    }
    if predicates.is_empty() {
        return Ok(Operator::Full {
            row_count: partition.sequence_count,
        });
    }
    Ok(selection(predicates, partition.sequence_count))
}

pub fn compile_int_between<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    from: Option<i32>,
    to: Option<i32>,
) -> Result<Operator<'a>, QueryError> {
    let ColumnPartition::Int(int_column) = column(partition, column_name)? else {
        return Err(QueryError::bad_request(format!(
            "Column {column_name} is not an INT column"
        )));
    };
    let mut predicates = Vec::new();
    match (from, to) {
        // A closed point range is a single equality predicate.
        (Some(from), Some(to)) if from == to => predicates.push(Predicate::Int {
            values: &int_column.values,
            comparator: Comparator::Equals,
            value: from,
        }),
        (from, to) => {
            if let Some(from) = from {
                predicates.push(Predicate::Int {
                    values: &int_column.values,
                    comparator: Comparator::GreaterOrEqual,
                    value: from,
                });
            }
            if let Some(to) = to {
                predicates.push(Predicate::Int {
                    values: &int_column.values,
                    comparator: Comparator::LessOrEqual,
                    value: to,
                });
            }
        }
    }
    if predicates.is_empty() {
        return Ok(Operator::Full {
            row_count: partition.sequence_count,
        });
    }
    Ok(selection(predicates, partition.sequence_count))
}

pub fn compile_float_equals<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    value: f64,
) -> Result<Operator<'a>, QueryError> {
    let ColumnPartition::Float(float_column) = column(partition, column_name)? else {
        return Err(QueryError::bad_request(format!(
            "Column {column_name} is not a FLOAT column"
        )));
    };
    Ok(selection(
        vec![Predicate::Float {
            values: &float_column.values,
            comparator: Comparator::Equals,
            value,
        }],
        partition.sequence_count,
    ))
}

pub fn compile_float_between<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    from: Option<f64>,
    to: Option<f64>,
) -> Result<Operator<'a>, QueryError> {
    let ColumnPartition::Float(float_column) = column(partition, column_name)? else {
        return Err(QueryError::bad_request(format!(
            "Column {column_name} is not a FLOAT column"
        )));
    };
    check_query!(
        from.map_or(true, |bound| !bound.is_nan()) && to.map_or(true, |bound| !bound.is_nan()),
        "FloatBetween bounds must not be NaN"
    );
    let mut predicates = Vec::new();
    if let Some(from) = from {
        predicates.push(Predicate::Float {
            values: &float_column.values,
            comparator: Comparator::GreaterOrEqual,
            value: from,
        });
    }
    if let Some(to) = to {
        predicates.push(Predicate::Float {
            values: &float_column.values,
            comparator: Comparator::LessOrEqual,
            value: to,
        });
    }
    if predicates.is_empty() {
        return Ok(Operator::Full {
            row_count: partition.sequence_count,
        });
    }
    Ok(selection(predicates, partition.sequence_count))
}

pub fn compile_bool_equals<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    value: Option<bool>,
) -> Result<Operator<'a>, QueryError> {
    let ColumnPartition::Bool(bool_column) = column(partition, column_name)? else {
        return Err(QueryError::bad_request(format!(
            "Column {column_name} is not a BOOL column"
        )));
    };
    Ok(selection(
        vec![Predicate::Bool {
            values: &bool_column.values,
            comparator: Comparator::Equals,
            value: OptionalBool::new(value),
        }],
        partition.sequence_count,
    ))
}

pub fn compile_string_equals<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    value: &str,
) -> Result<Operator<'a>, QueryError> {
    let row_count = partition.sequence_count;
    match column(partition, column_name)? {
        ColumnPartition::String(string_column) => Ok(selection(
            vec![Predicate::StringFingerprint {
                values: &string_column.values,
                comparator: Comparator::Equals,
                value: SiloString::new(value),
            }],
            row_count,
        )),
        ColumnPartition::IndexedString(indexed_column) => {
            // Equality is a single stored bitmap.
            let bitmap = indexed_column
                .dictionary
                .lookup(value)
                .and_then(|value_id| indexed_column.bitmap_for(value_id));
            Ok(match bitmap {
                Some(bitmap) => Operator::IndexScan {
                    bitmap: OperatorResult::Borrowed(bitmap),
                    row_count,
                },
                None => Operator::Empty { row_count },
            })
        }
        _ => Err(QueryError::bad_request(format!(
            "Column {column_name} is not a STRING column"
        ))),
    }
}

pub fn compile_pango_lineage<'a>(
    partition: &'a TablePartition,
    column_name: &str,
    value: &str,
    include_sublineages: bool,
) -> Result<Operator<'a>, QueryError> {
    let ColumnPartition::IndexedString(indexed_column) = column(partition, column_name)? else {
        return Err(QueryError::bad_request(format!(
            "Column {column_name} is not an INDEXED_STRING column"
        )));
    };
    let row_count = partition.sequence_count;
    let lineage = value.to_ascii_uppercase();

    if !include_sublineages {
        let bitmap = indexed_column
            .dictionary
            .lookup(&lineage)
            .and_then(|value_id| indexed_column.bitmap_for(value_id));
        return Ok(match bitmap {
            Some(bitmap) => Operator::IndexScan {
                bitmap: OperatorResult::Borrowed(bitmap),
                row_count,
            },
            None => Operator::Empty { row_count },
        });
    }

    // Sublineages are dotted descendants: B.1.1 covers B.1.1.7 but not
    // B.1.17.
    let prefix = format!("{lineage}.");
    let matching_ids = indexed_column
        .dictionary
        .ids_matching(|candidate| candidate == lineage || candidate.starts_with(&prefix));
    let mut bitmap = RoaringBitmap::new();
    for value_id in matching_ids {
        if let Some(rows) = indexed_column.bitmap_for(value_id) {
            bitmap |= rows;
        }
    }
    Ok(Operator::IndexScan {
        bitmap: OperatorResult::Owned(bitmap),
        row_count,
    })
}
