//! Query actions: each consumes the per-partition filter bitmaps and
//! produces a [`QueryResult`].

mod aggregated;
mod details;
mod fasta;
mod insertions;
mod mutations;

use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::Deserialize;
use storage::Table;

use crate::result::{OrderByField, QueryResult};
use crate::QueryError;

/// The closed set of actions, deserialized from the query's `action`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    Aggregated {
        #[serde(default, alias = "groupBy")]
        group_by_fields: Vec<String>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        randomize_seed: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Details {
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        randomize_seed: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    NucMutations {
        #[serde(default)]
        sequence_name: Option<String>,
        #[serde(default)]
        min_proportion: Option<f64>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
    },
    #[serde(rename = "AAMutations", rename_all = "camelCase")]
    AaMutations {
        #[serde(default, alias = "sequenceNames")]
        sequence_names: Vec<String>,
        #[serde(default)]
        min_proportion: Option<f64>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    InsertionAggregation {
        #[serde(default, alias = "sequenceNames")]
        sequence_names: Vec<String>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Fasta {
        sequence_names: Vec<String>,
        #[serde(default)]
        additional_fields: Vec<String>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        randomize_seed: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    FastaAligned {
        sequence_names: Vec<String>,
        #[serde(default)]
        additional_fields: Vec<String>,
        #[serde(default, alias = "orderBy")]
        order_by_fields: Vec<OrderByField>,
        #[serde(default)]
        limit: Option<u64>,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        randomize_seed: Option<u64>,
    },
}

impl Action {
    /// Run the action over the per-partition filter results. `bitmaps`
    /// is indexed like `table.partitions`.
    pub fn execute(
        &self,
        table: &Arc<Table>,
        bitmaps: Vec<RoaringBitmap>,
    ) -> Result<QueryResult, QueryError> {
        debug_assert_eq!(bitmaps.len(), table.partitions.len());
        match self {
            Action::Aggregated {
                group_by_fields,
                order_by_fields,
                limit,
                offset,
                randomize_seed,
            } => aggregated::execute(
                table,
                &bitmaps,
                group_by_fields,
                order_by_fields,
                *limit,
                *offset,
                *randomize_seed,
            ),
            Action::Details {
                fields,
                order_by_fields,
                limit,
                offset,
                randomize_seed,
            } => details::execute(
                table,
                bitmaps,
                fields,
                order_by_fields,
                *limit,
                *offset,
                *randomize_seed,
            ),
            Action::NucMutations {
                sequence_name,
                min_proportion,
                order_by_fields,
                limit,
                offset,
            } => mutations::execute_nucleotide(
                table,
                &bitmaps,
                sequence_name.as_deref(),
                *min_proportion,
                order_by_fields,
                *limit,
                *offset,
            ),
            Action::AaMutations {
                sequence_names,
                min_proportion,
                order_by_fields,
                limit,
                offset,
            } => mutations::execute_amino_acid(
                table,
                &bitmaps,
                sequence_names,
                *min_proportion,
                order_by_fields,
                *limit,
                *offset,
            ),
            Action::InsertionAggregation {
                sequence_names,
                order_by_fields,
                limit,
                offset,
            } => insertions::execute(
                table,
                &bitmaps,
                sequence_names,
                order_by_fields,
                *limit,
                *offset,
            ),
            Action::Fasta {
                sequence_names,
                additional_fields,
                order_by_fields,
                limit,
                offset,
                randomize_seed,
            } => fasta::execute(
                table,
                &bitmaps,
                sequence_names,
                additional_fields,
                order_by_fields,
                *limit,
                *offset,
                *randomize_seed,
                false,
            ),
            Action::FastaAligned {
                sequence_names,
                additional_fields,
                order_by_fields,
                limit,
                offset,
                randomize_seed,
            } => fasta::execute(
                table,
                &bitmaps,
                sequence_names,
                additional_fields,
                order_by_fields,
                *limit,
                *offset,
                *randomize_seed,
                true,
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_json_forms_parse() {
        let actions = [
            json!({"type": "Aggregated"}),
            json!({"type": "Aggregated", "groupByFields": ["country"],
                   "orderByFields": [{"field": "count", "order": "descending"}, "country"]}),
            json!({"type": "Details", "fields": ["primaryKey"], "limit": 3, "offset": 1,
                   "orderByFields": ["primaryKey"]}),
            json!({"type": "NucMutations", "minProportion": 0.5}),
            json!({"type": "AAMutations", "sequenceNames": ["gene1"]}),
            json!({"type": "InsertionAggregation"}),
            json!({"type": "Fasta", "sequenceNames": ["segment1"]}),
            json!({"type": "FastaAligned", "sequenceNames": ["segment1"],
                   "randomizeSeed": 7}),
        ];
        for action in actions {
            let parsed: Result<Action, _> = serde_json::from_value(action.clone());
            assert!(parsed.is_ok(), "failed to parse {action}");
        }
    }
}
