//! End-to-end query tests over a small two-partition database.

use fxhash::FxHashMap;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use silo::{Database, QueryError};
use storage::{ColumnIdentifier, ColumnType, Table, TableSchema};

fn schema() -> TableSchema {
    let column = |name: &str, column_type| ColumnIdentifier {
        name: name.to_string(),
        column_type,
    };
    TableSchema {
        columns: vec![
            column("primaryKey", ColumnType::String),
            column("country", ColumnType::IndexedString),
            column("age", ColumnType::Int),
            column("coverage", ColumnType::Float),
            column("date", ColumnType::Date),
            column("unaligned_segment1", ColumnType::ZstdCompressedString),
            column("segment1", ColumnType::NucleotideSequence),
        ],
        primary_key: "primaryKey".to_string(),
        default_nucleotide_sequence: Some("segment1".to_string()),
        default_amino_acid_sequence: None,
    }
}

/// The six-row reference dataset, split over two partitions.
fn six_row_database() -> Database {
    let mut references = FxHashMap::default();
    references.insert("segment1".to_string(), "ATGCN".to_string());
    let mut table = Table::new(schema(), &references, FxHashMap::default()).unwrap();

    let rows = [
        json!({"primaryKey": "id_0", "country": "Switzerland", "age": 7,
               "coverage": 0.9, "date": "2020-01-01"}),
        json!({"primaryKey": "id_1", "country": "Germany", "age": null,
               "coverage": 0.9, "date": "2000-03-07"}),
        json!({"primaryKey": "id_2", "country": "Germany", "age": 13,
               "coverage": 0.9, "date": "2009-06-07"}),
        json!({"primaryKey": "id_3", "country": "Switzerland", "age": null,
               "coverage": 0.9, "date": "2003-07-02"}),
        json!({"primaryKey": "id_4", "country": "Switzerland", "age": 19,
               "coverage": 0.9, "date": "2002-01-04"}),
        json!({"primaryKey": "id_5", "country": "Switzerland", "age": null,
               "coverage": 0.9, "date": "2001-12-07"}),
    ];
    for chunk in rows.chunks(3) {
        let partition_idx = table.create_partition();
        let partition = &mut table.partitions[partition_idx];
        for row in chunk {
            let mut row = row.clone();
            let fields = row.as_object_mut().unwrap();
            fields.insert("unaligned_segment1".to_string(), json!("ACGT"));
            fields.insert(
                "segment1".to_string(),
                json!({"sequence": "ACGT-", "insertions": ["2:A"]}),
            );
            partition.append_row(&row).unwrap();
        }
        partition.finalize();
    }
    table.validate().unwrap();
    Database::new(table)
}

async fn run(database: &Database, query: Value) -> Vec<Value> {
    database
        .execute_query_collect(&query.to_string())
        .await
        .unwrap()
        .into_iter()
        .map(|entry| Value::Object(entry.fields))
        .collect()
}

async fn run_err(database: &Database, query: Value) -> QueryError {
    database
        .execute_query_collect(&query.to_string())
        .await
        .unwrap_err()
}

fn count_query(filter: Value) -> Value {
    json!({"filterExpression": filter, "action": {"type": "Aggregated"}})
}

async fn count_of(database: &Database, filter: Value) -> u64 {
    let entries = run(database, count_query(filter)).await;
    entries[0]["count"].as_u64().unwrap()
}

#[tokio::test]
async fn test_aggregated_count_of_everything() {
    let database = six_row_database();
    let entries = run(&database, count_query(json!({"type": "True"}))).await;
    insta::assert_json_snapshot!(entries, @r###"
    [
      {
        "count": 6
      }
    ]
    "###);
}

#[tokio::test]
async fn test_aggregated_grouped_by_country() {
    let database = six_row_database();
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {
                "type": "Aggregated",
                "groupByFields": ["country"],
                "orderByFields": [{"field": "count", "order": "descending"}, "country"],
            },
        }),
    )
    .await;
    assert_eq!(
        entries,
        vec![
            json!({"count": 4, "country": "Switzerland"}),
            json!({"count": 2, "country": "Germany"}),
        ]
    );
}

#[tokio::test]
async fn test_aggregated_grouped_by_nullable_int() {
    let database = six_row_database();
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {
                "type": "Aggregated",
                "groupByFields": ["age"],
                "orderByFields": ["count", {"field": "age", "order": "descending"}],
            },
        }),
    )
    .await;
    assert_eq!(
        entries,
        vec![
            json!({"age": 19, "count": 1}),
            json!({"age": 13, "count": 1}),
            json!({"age": 7, "count": 1}),
            json!({"age": null, "count": 3}),
        ]
    );
}

#[tokio::test]
async fn test_details_with_limit_and_offset() {
    let database = six_row_database();
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {
                "type": "Details",
                "orderByFields": ["primaryKey"],
                "limit": 3,
                "offset": 1,
            },
        }),
    )
    .await;
    let keys: Vec<&str> = entries
        .iter()
        .map(|entry| entry["primaryKey"].as_str().unwrap())
        .collect();
    assert_eq!(keys, ["id_1", "id_2", "id_3"]);
    // Every metadata column is projected.
    for column in ["primaryKey", "country", "age", "coverage", "date", "unaligned_segment1"] {
        assert!(entries[0].get(column).is_some(), "missing column {column}");
    }
    assert_eq!(entries[0]["age"], json!(null));
    assert_eq!(entries[1]["age"], json!(13));
    assert_eq!(entries[0]["date"], json!("2000-03-07"));
    assert_eq!(entries[0]["unaligned_segment1"], json!("ACGT"));
}

#[tokio::test]
async fn test_details_streams_in_row_order_without_ordering() {
    let database = six_row_database();
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {"type": "Details", "fields": ["primaryKey"], "limit": 4, "offset": 1},
        }),
    )
    .await;
    let keys: Vec<&str> = entries
        .iter()
        .map(|entry| entry["primaryKey"].as_str().unwrap())
        .collect();
    assert_eq!(keys, ["id_1", "id_2", "id_3", "id_4"]);
}

#[tokio::test]
async fn test_unordered_aggregated_rejects_limit() {
    let database = six_row_database();
    let error = run_err(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {"type": "Aggregated", "groupByFields": ["primaryKey"], "limit": 1},
        }),
    )
    .await;
    assert_eq!(error.status_code(), 400);
    assert!(error
        .to_string()
        .contains("Offset and limit can only be applied"));
}

#[tokio::test]
async fn test_symbol_filters() {
    let database = six_row_database();
    // All rows read A at position 1 (the reference symbol).
    let all = count_of(
        &database,
        json!({"type": "SymbolEquals", "position": 1, "symbol": "A"}),
    )
    .await;
    assert_eq!(all, 6);
    // All rows read C at position 2, which differs from the reference T.
    let mutated = count_of(
        &database,
        json!({"type": "SymbolEquals", "position": 2, "symbol": "C"}),
    )
    .await;
    assert_eq!(mutated, 6);
    // `.` matches the global reference symbol.
    let reference = count_of(
        &database,
        json!({"type": "SymbolEquals", "position": 2, "symbol": "."}),
    )
    .await;
    assert_eq!(reference, 0);
    let in_set = count_of(
        &database,
        json!({"type": "SymbolInSet", "position": 2, "symbols": ["C", "T"]}),
    )
    .await;
    assert_eq!(in_set, 6);
}

#[tokio::test]
async fn test_has_mutation() {
    let database = six_row_database();
    let unmutated = count_of(&database, json!({"type": "HasMutation", "position": 1})).await;
    assert_eq!(unmutated, 0);
    let mutated = count_of(&database, json!({"type": "HasMutation", "position": 2})).await;
    assert_eq!(mutated, 6);
    // The gap at position 5 differs from the reference N.
    let gap = count_of(&database, json!({"type": "HasMutation", "position": 5})).await;
    assert_eq!(gap, 6);
}

#[tokio::test]
async fn test_position_out_of_bounds_is_a_bad_request() {
    let database = six_row_database();
    let error = run_err(
        &database,
        count_query(json!({"type": "SymbolEquals", "position": 6, "symbol": "A"})),
    )
    .await;
    assert_eq!(error.status_code(), 400);
    assert!(error.to_string().contains("out of bounds"));
}

#[tokio::test]
async fn test_metadata_filters() {
    let database = six_row_database();
    assert_eq!(
        count_of(
            &database,
            json!({"type": "StringEquals", "column": "country", "value": "Germany"}),
        )
        .await,
        2
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "StringEquals", "column": "primaryKey", "value": "id_4"}),
        )
        .await,
        1
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "IntEquals", "column": "age", "value": 13}),
        )
        .await,
        1
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "IntBetween", "column": "age", "from": 10}),
        )
        .await,
        2
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "FloatEquals", "column": "coverage", "value": 0.9}),
        )
        .await,
        6
    );
    assert_eq!(
        count_of(
            &database,
            json!({
                "type": "DateBetween", "column": "date",
                "from": "2001-01-01", "to": "2010-01-01",
            }),
        )
        .await,
        4
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "DateBetween", "column": "date", "to": "2000-12-31"}),
        )
        .await,
        1
    );
}

#[tokio::test]
async fn test_boolean_algebra_composes() {
    let database = six_row_database();
    let filter = json!({
        "type": "And",
        "children": [
            {"type": "StringEquals", "column": "country", "value": "Switzerland"},
            {"type": "Not", "child": {"type": "IntEquals", "column": "age", "value": 7}},
        ],
    });
    assert_eq!(count_of(&database, filter).await, 3);

    let de_morgan_left = json!({
        "type": "Not",
        "child": {"type": "Or", "children": [
            {"type": "StringEquals", "column": "country", "value": "Germany"},
            {"type": "IntEquals", "column": "age", "value": 7},
        ]},
    });
    let de_morgan_right = json!({
        "type": "And",
        "children": [
            {"type": "Not", "child": {"type": "StringEquals", "column": "country", "value": "Germany"}},
            {"type": "Not", "child": {"type": "IntEquals", "column": "age", "value": 7}},
        ],
    });
    assert_eq!(
        count_of(&database, de_morgan_left).await,
        count_of(&database, de_morgan_right).await,
    );
}

#[tokio::test]
async fn test_n_of_strategies_agree() {
    let database = six_row_database();
    let filter = |strategy: u8| {
        json!({
            "type": "N-Of",
            "n": 2,
            "matchExactly": true,
            "impl": strategy,
            "children": [
                {"type": "StringEquals", "column": "country", "value": "Switzerland"},
                {"type": "IntEquals", "column": "age", "value": 7},
                {"type": "DateBetween", "column": "date", "from": "2019-01-01"},
            ],
        })
    };
    // id_0 matches all three, so "exactly 2" excludes it; id_3, id_4 and
    // id_5 match Switzerland only.
    for strategy in 0..3u8 {
        assert_eq!(count_of(&database, filter(strategy)).await, 0);
    }
    let at_least = |strategy: u8| {
        json!({
            "type": "N-Of",
            "n": 2,
            "impl": strategy,
            "children": [
                {"type": "StringEquals", "column": "country", "value": "Switzerland"},
                {"type": "IntEquals", "column": "age", "value": 7},
                {"type": "DateBetween", "column": "date", "from": "2019-01-01"},
            ],
        })
    };
    for strategy in 0..3u8 {
        assert_eq!(count_of(&database, at_least(strategy)).await, 1);
    }
}

#[tokio::test]
async fn test_insertion_filter_and_aggregation() {
    let database = six_row_database();
    assert_eq!(
        count_of(
            &database,
            json!({"type": "HasInsertion", "position": 2, "pattern": "A"}),
        )
        .await,
        6
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "HasInsertion", "position": 2, "pattern": "A.*"}),
        )
        .await,
        6
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "HasInsertion", "position": 2, "pattern": "TT"}),
        )
        .await,
        0
    );

    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {"type": "InsertionAggregation"},
        }),
    )
    .await;
    assert_eq!(
        entries,
        vec![json!({
            "position": 2,
            "insertedSymbols": "A",
            "sequenceName": "segment1",
            "count": 6,
        })]
    );
}

#[tokio::test]
async fn test_nuc_mutations() {
    let database = six_row_database();
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {"type": "NucMutations", "minProportion": 0.05},
        }),
    )
    .await;
    let mutations: Vec<&str> = entries
        .iter()
        .map(|entry| entry["mutation"].as_str().unwrap())
        .collect();
    assert_eq!(mutations, ["T2C", "C4T", "N5-"]);
    for entry in &entries {
        assert_eq!(entry["count"], json!(6));
        assert_eq!(entry["proportion"], json!(1.0));
        assert_eq!(entry["sequenceName"], json!("segment1"));
    }
}

#[tokio::test]
async fn test_nuc_mutations_validates_min_proportion() {
    let database = six_row_database();
    for bad in [0.0, -0.5, 1.5] {
        let error = run_err(
            &database,
            json!({
                "filterExpression": {"type": "True"},
                "action": {"type": "NucMutations", "minProportion": bad},
            }),
        )
        .await;
        assert_eq!(error.status_code(), 400);
    }
}

#[tokio::test]
async fn test_fasta_aligned_round_trips_sequences() {
    let mut references = FxHashMap::default();
    references.insert("segment1".to_string(), "ATGCN".to_string());
    let mut table = Table::new(schema(), &references, FxHashMap::default()).unwrap();
    let partition_idx = table.create_partition();
    let partition = &mut table.partitions[partition_idx];
    let sequences = ["ATGCN", "ATGCN", "NNNNN", "CATTT"];
    for (idx, sequence) in sequences.iter().enumerate() {
        partition
            .append_row(&json!({
                "primaryKey": format!("id_{idx}"),
                "segment1": sequence,
            }))
            .unwrap();
    }
    partition.finalize();
    let database = Database::new(table);

    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {
                "type": "FastaAligned",
                "sequenceNames": ["segment1"],
                "orderByFields": ["primaryKey"],
            },
        }),
    )
    .await;
    let reconstructed: Vec<&str> = entries
        .iter()
        .map(|entry| entry["segment1"].as_str().unwrap())
        .collect();
    assert_eq!(reconstructed, sequences);
}

#[tokio::test]
async fn test_fasta_reads_the_unaligned_column() {
    let database = six_row_database();
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "StringEquals", "column": "primaryKey", "value": "id_2"},
            "action": {"type": "Fasta", "sequenceNames": ["segment1"]},
        }),
    )
    .await;
    assert_eq!(
        entries,
        vec![json!({"primaryKey": "id_2", "segment1": "ACGT"})]
    );
}

#[tokio::test]
async fn test_randomized_order_is_deterministic() {
    let database = six_row_database();
    let query = json!({
        "filterExpression": {"type": "True"},
        "action": {
            "type": "Details",
            "fields": ["primaryKey", "country"],
            "orderByFields": ["country"],
            "randomizeSeed": 42,
        },
    });
    let first = run(&database, query.clone()).await;
    let second = run(&database, query).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_save_and_load_round_trips_query_results() {
    let database = six_row_database();
    let dir = tempfile::tempdir().unwrap();
    database.save(dir.path()).unwrap();
    let reloaded = Database::load(dir.path()).unwrap();

    let query = json!({
        "filterExpression": {"type": "True"},
        "action": {
            "type": "Aggregated",
            "groupByFields": ["country"],
            "orderByFields": [{"field": "count", "order": "descending"}, "country"],
        },
    });
    assert_eq!(
        run(&database, query.clone()).await,
        run(&reloaded, query).await
    );
}

#[tokio::test]
async fn test_cancelled_query_reports_cancellation() {
    let database = six_row_database();
    let cancellation = tokio_util::sync::CancellationToken::new();
    cancellation.cancel();
    let result = database
        .execute_query(
            &count_query(json!({"type": "True"})).to_string(),
            &cancellation,
        )
        .await;
    assert!(matches!(result, Err(QueryError::Cancelled)));
}

fn small_database(
    columns: Vec<ColumnIdentifier>,
    references: &[(&str, &str)],
    default_nucleotide: Option<&str>,
    default_amino_acid: Option<&str>,
    rows: Vec<Value>,
) -> Database {
    let mut schema_columns = vec![ColumnIdentifier {
        name: "primaryKey".to_string(),
        column_type: ColumnType::String,
    }];
    schema_columns.extend(columns);
    let schema = TableSchema {
        columns: schema_columns,
        primary_key: "primaryKey".to_string(),
        default_nucleotide_sequence: default_nucleotide.map(str::to_string),
        default_amino_acid_sequence: default_amino_acid.map(str::to_string),
    };
    let mut reference_map = FxHashMap::default();
    for (name, reference) in references {
        reference_map.insert(name.to_string(), reference.to_string());
    }
    let mut table = Table::new(schema, &reference_map, FxHashMap::default()).unwrap();
    let partition_idx = table.create_partition();
    let partition = &mut table.partitions[partition_idx];
    for row in rows {
        partition.append_row(&row).unwrap();
    }
    partition.finalize();
    table.validate().unwrap();
    Database::new(table)
}

#[tokio::test]
async fn test_ambiguity_modes() {
    let database = small_database(
        vec![ColumnIdentifier {
            name: "segment1".to_string(),
            column_type: ColumnType::NucleotideSequence,
        }],
        &[("segment1", "ATGCN")],
        Some("segment1"),
        None,
        vec![
            json!({"primaryKey": "id_0", "segment1": "ATGCN"}),
            json!({"primaryKey": "id_1", "segment1": "RTGCN"}),
            json!({"primaryKey": "id_2", "segment1": "NTGCN"}),
        ],
    );
    let symbol_equals_a = json!({"type": "SymbolEquals", "position": 1, "symbol": "A"});

    // Exact: only the row that stores a literal A.
    assert_eq!(count_of(&database, symbol_equals_a.clone()).await, 1);
    // Upper bound: R and N may both resolve to A.
    assert_eq!(
        count_of(
            &database,
            json!({"type": "Maybe", "child": symbol_equals_a.clone()}),
        )
        .await,
        3
    );
    // Exact inside Maybe resets the mode.
    assert_eq!(
        count_of(
            &database,
            json!({"type": "Maybe", "child": {"type": "Exact", "child": symbol_equals_a.clone()}}),
        )
        .await,
        1
    );
    // Negation flips the bound: "maybe not A" keeps rows that are not
    // certainly A.
    assert_eq!(
        count_of(
            &database,
            json!({"type": "Maybe", "child": {"type": "Not", "child": symbol_equals_a}}),
        )
        .await,
        2
    );
}

#[tokio::test]
async fn test_aa_mutations() {
    let database = small_database(
        vec![ColumnIdentifier {
            name: "gene1".to_string(),
            column_type: ColumnType::AminoAcidSequence,
        }],
        &[("gene1", "MSKG")],
        None,
        Some("gene1"),
        vec![
            json!({"primaryKey": "id_0", "gene1": "MSRG"}),
            json!({"primaryKey": "id_1", "gene1": "MSRG"}),
            json!({"primaryKey": "id_2", "gene1": "XXXX"}),
        ],
    );
    let entries = run(
        &database,
        json!({
            "filterExpression": {"type": "True"},
            "action": {"type": "AAMutations"},
        }),
    )
    .await;
    assert_eq!(
        entries,
        vec![json!({
            "mutation": "K3R",
            "count": 2,
            "proportion": 1.0,
            "sequenceName": "gene1",
        })]
    );
}

#[tokio::test]
async fn test_pango_lineage_and_bool_filters() {
    let database = small_database(
        vec![
            ColumnIdentifier {
                name: "lineage".to_string(),
                column_type: ColumnType::IndexedString,
            },
            ColumnIdentifier {
                name: "qc".to_string(),
                column_type: ColumnType::Bool,
            },
        ],
        &[],
        None,
        None,
        vec![
            json!({"primaryKey": "id_0", "lineage": "B.1.1", "qc": true}),
            json!({"primaryKey": "id_1", "lineage": "B.1.1.7", "qc": false}),
            json!({"primaryKey": "id_2", "lineage": "B.1.17", "qc": null}),
            json!({"primaryKey": "id_3", "lineage": null, "qc": null}),
        ],
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "PangoLineage", "column": "lineage", "value": "B.1.1",
                   "includeSublineages": false}),
        )
        .await,
        1
    );
    // Sublineages cover B.1.1.7 but not B.1.17.
    assert_eq!(
        count_of(
            &database,
            json!({"type": "PangoLineage", "column": "lineage", "value": "B.1.1",
                   "includeSublineages": true}),
        )
        .await,
        2
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "BoolEquals", "column": "qc", "value": true}),
        )
        .await,
        1
    );
    assert_eq!(
        count_of(
            &database,
            json!({"type": "BoolEquals", "column": "qc", "value": null}),
        )
        .await,
        2
    );
}

#[tokio::test]
async fn test_unknown_column_is_a_bad_request() {
    let database = six_row_database();
    let error = run_err(
        &database,
        count_query(json!({"type": "IntEquals", "column": "elevation", "value": 3})),
    )
    .await;
    assert_eq!(error.status_code(), 400);
    assert!(error.to_string().contains("elevation"));
}
