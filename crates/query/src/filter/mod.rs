//! The JSON filter AST and its compilation into operator trees.

mod metadata;
mod sequence;

use serde::Deserialize;
use storage::{Table, TablePartition};

use crate::error::check_query;
use crate::operators::{Operator, ThresholdImpl};
use crate::QueryError;

/// How ambiguity codes are interpreted while compiling symbol filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmbiguityMode {
    /// Match the stored symbol exactly.
    None,
    /// Match every stored symbol that could resolve to the query.
    UpperBound,
    /// Match only stored symbols that resolve to the query under every
    /// interpretation.
    LowerBound,
}

impl AmbiguityMode {
    /// Negation swaps the bounds: "maybe not X" is the complement of
    /// "definitely X".
    pub fn flip(self) -> AmbiguityMode {
        match self {
            AmbiguityMode::None => AmbiguityMode::None,
            AmbiguityMode::UpperBound => AmbiguityMode::LowerBound,
            AmbiguityMode::LowerBound => AmbiguityMode::UpperBound,
        }
    }
}

/// The closed set of filter node kinds, deserialized from the query's
/// `filterExpression`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum FilterExpression {
    True,
    False,
    And {
        children: Vec<FilterExpression>,
    },
    Or {
        children: Vec<FilterExpression>,
    },
    Not {
        child: Box<FilterExpression>,
    },
    #[serde(rename = "N-Of", rename_all = "camelCase")]
    NOf {
        #[serde(alias = "numberOfMatchers")]
        n: u32,
        #[serde(default)]
        match_exactly: bool,
        children: Vec<FilterExpression>,
        /// Optional evaluation-strategy override, a benchmark hook.
        #[serde(default, rename = "impl")]
        strategy: Option<u8>,
    },
    Maybe {
        child: Box<FilterExpression>,
    },
    Exact {
        child: Box<FilterExpression>,
    },
    #[serde(rename_all = "camelCase")]
    SymbolEquals {
        #[serde(default)]
        sequence_name: Option<String>,
        /// 1-based in the JSON.
        position: u32,
        symbol: String,
    },
    #[serde(rename_all = "camelCase")]
    SymbolInSet {
        #[serde(default)]
        sequence_name: Option<String>,
        position: u32,
        symbols: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    HasMutation {
        #[serde(default)]
        sequence_name: Option<String>,
        position: u32,
    },
    #[serde(rename_all = "camelCase")]
    HasInsertion {
        #[serde(default)]
        sequence_name: Option<String>,
        position: u32,
        pattern: String,
    },
    DateBetween {
        column: String,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
    StringEquals {
        column: String,
        value: String,
    },
    IntEquals {
        column: String,
        value: i32,
    },
    IntBetween {
        column: String,
        #[serde(default)]
        from: Option<i32>,
        #[serde(default)]
        to: Option<i32>,
    },
    FloatEquals {
        column: String,
        value: f64,
    },
    FloatBetween {
        column: String,
        #[serde(default)]
        from: Option<f64>,
        #[serde(default)]
        to: Option<f64>,
    },
    BoolEquals {
        column: String,
        value: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    PangoLineage {
        column: String,
        value: String,
        #[serde(default)]
        include_sublineages: bool,
    },
}

impl FilterExpression {
    /// Lower this expression into an operator tree against one
    /// partition. `mode` propagates to symbol filters; `Not` flips it,
    /// `Maybe` forces the upper bound and `Exact` resets to exact.
    pub fn compile<'a>(
        &self,
        table: &'a Table,
        partition: &'a TablePartition,
        mode: AmbiguityMode,
    ) -> Result<Operator<'a>, QueryError> {
        let row_count = partition.sequence_count;
        match self {
            FilterExpression::True => Ok(Operator::Full { row_count }),
            FilterExpression::False => Ok(Operator::Empty { row_count }),
            FilterExpression::And { children } => {
                if children.is_empty() {
                    return Ok(Operator::Full { row_count });
                }
                let (positive, negated) =
                    compile_splitting_negations(children, table, partition, mode)?;
                Ok(Operator::Intersection {
                    children: positive,
                    negated_children: negated,
                    row_count,
                })
            }
            FilterExpression::Or { children } => {
                let compiled = children
                    .iter()
                    .map(|child| child.compile(table, partition, mode))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Operator::Union {
                    children: compiled,
                    row_count,
                })
            }
            FilterExpression::Not { child } => {
                Ok(child.compile(table, partition, mode.flip())?.negate())
            }
            FilterExpression::NOf {
                n,
                match_exactly,
                children,
                strategy,
            } => {
                check_query!(
                    !children.is_empty(),
                    "The N-Of expression requires at least one child"
                );
                check_query!(
                    *n as usize <= children.len(),
                    "The N-Of expression cannot require {n} matches from {} children",
                    children.len()
                );
                let strategy = match strategy {
                    None | Some(1) => ThresholdImpl::Dp,
                    Some(0) => ThresholdImpl::Counting,
                    Some(2) => ThresholdImpl::HeapMerge,
                    Some(other) => {
                        return Err(QueryError::bad_request(format!(
                            "Unknown N-Of implementation {other}, expected 0, 1 or 2"
                        )))
                    }
                };
                let (positive, negated) =
                    compile_splitting_negations(children, table, partition, mode)?;
                Ok(Operator::Threshold {
                    children: positive,
                    negated_children: negated,
                    n: *n,
                    match_exactly: *match_exactly,
                    strategy,
                    row_count,
                })
            }
            FilterExpression::Maybe { child } => {
                child.compile(table, partition, AmbiguityMode::UpperBound)
            }
            FilterExpression::Exact { child } => {
                child.compile(table, partition, AmbiguityMode::None)
            }
            FilterExpression::SymbolEquals {
                sequence_name,
                position,
                symbol,
            } => sequence::compile_symbol_equals(
                table,
                partition,
                sequence_name.as_deref(),
                *position,
                symbol,
                mode,
            ),
            FilterExpression::SymbolInSet {
                sequence_name,
                position,
                symbols,
            } => sequence::compile_symbol_in_set(
                table,
                partition,
                sequence_name.as_deref(),
                *position,
                symbols,
                mode,
            ),
            FilterExpression::HasMutation {
                sequence_name,
                position,
            } => sequence::compile_has_mutation(
                table,
                partition,
                sequence_name.as_deref(),
                *position,
                mode,
            ),
            FilterExpression::HasInsertion {
                sequence_name,
                position,
                pattern,
            } => sequence::compile_has_insertion(
                table,
                partition,
                sequence_name.as_deref(),
                *position,
                pattern,
            ),
            FilterExpression::DateBetween { column, from, to } => {
                metadata::compile_date_between(partition, column, from.as_deref(), to.as_deref())
            }
            FilterExpression::StringEquals { column, value } => {
                metadata::compile_string_equals(partition, column, value)
            }
            FilterExpression::IntEquals { column, value } => {
                metadata::compile_int_between(partition, column, Some(*value), Some(*value))
            }
            FilterExpression::IntBetween { column, from, to } => {
                metadata::compile_int_between(partition, column, *from, *to)
            }
            FilterExpression::FloatEquals { column, value } => {
                metadata::compile_float_equals(partition, column, *value)
            }
            FilterExpression::FloatBetween { column, from, to } => {
                metadata::compile_float_between(partition, column, *from, *to)
            }
            FilterExpression::BoolEquals { column, value } => {
                metadata::compile_bool_equals(partition, column, *value)
            }
            FilterExpression::PangoLineage {
                column,
                value,
                include_sublineages,
            } => metadata::compile_pango_lineage(partition, column, value, *include_sublineages),
        }
    }
}

/// Compile a child list, peeling `Not` wrappers into the negated list
/// so intersections and thresholds can subtract instead of
/// complementing.
fn compile_splitting_negations<'a>(
    children: &[FilterExpression],
    table: &'a Table,
    partition: &'a TablePartition,
    mode: AmbiguityMode,
) -> Result<(Vec<Operator<'a>>, Vec<Operator<'a>>), QueryError> {
    let mut positive = Vec::new();
    let mut negated = Vec::new();
    for child in children {
        match child {
            FilterExpression::Not { child } => {
                negated.push(child.compile(table, partition, mode.flip())?);
            }
            other => positive.push(other.compile(table, partition, mode)?),
        }
    }
    Ok((positive, negated))
}
