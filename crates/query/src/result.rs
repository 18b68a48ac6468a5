use std::cmp::Ordering;

use serde::Deserialize;
use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::QueryError;

/// One entry of a query result: a flat `{field → value}` object.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct QueryResultEntry {
    pub fields: serde_json::Map<String, Value>,
}

impl QueryResultEntry {
    pub fn get(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }
}

/// One order-by instruction. The JSON form is either a plain string
/// (ascending) or `{"field": …, "order": "ascending"|"descending"}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderByField {
    pub field: String,
    pub ascending: bool,
}

impl<'de> Deserialize<'de> for OrderByField {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum Order {
            Ascending,
            Descending,
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Field(String),
            Explicit {
                field: String,
                #[serde(default)]
                order: Option<Order>,
            },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Field(field) => OrderByField {
                field,
                ascending: true,
            },
            Raw::Explicit { field, order } => OrderByField {
                field,
                ascending: !matches!(order, Some(Order::Descending)),
            },
        })
    }
}

/// The result of one query: a stream of entries, either fully
/// materialized or pulled batch-wise from a generator.
///
/// A generator receives the cleared chunk buffer and refills it with
/// the next batch; leaving it empty signals the end of the stream.
pub type ChunkGenerator =
    Box<dyn FnMut(&mut Vec<QueryResultEntry>) -> Result<(), QueryError> + Send>;

pub struct QueryResult {
    chunk: Vec<QueryResultEntry>,
    chunk_idx: usize,
    get_chunk: Option<ChunkGenerator>,
    materialized: bool,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("buffered", &(self.chunk.len() - self.chunk_idx.min(self.chunk.len())))
            .field("materialized", &self.materialized)
            .finish()
    }
}

impl QueryResult {
    /// An eagerly evaluated result.
    pub fn from_vec(entries: Vec<QueryResultEntry>) -> QueryResult {
        QueryResult {
            chunk: entries,
            chunk_idx: 0,
            get_chunk: None,
            materialized: true,
        }
    }

    /// A streaming result.
    pub fn from_generator(
        get_chunk: impl FnMut(&mut Vec<QueryResultEntry>) -> Result<(), QueryError> + Send + 'static,
    ) -> QueryResult {
        QueryResult {
            chunk: Vec::new(),
            chunk_idx: 0,
            get_chunk: Some(Box::new(get_chunk)),
            materialized: false,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    /// The next entry, or `None` at the end of the result set.
    pub fn next_entry(&mut self) -> Result<Option<&QueryResultEntry>, QueryError> {
        if self.chunk_idx >= self.chunk.len() {
            self.chunk.clear();
            self.chunk_idx = 0;
            if let Some(get_chunk) = &mut self.get_chunk {
                get_chunk(&mut self.chunk)?;
            }
            if self.chunk.is_empty() {
                return Ok(None);
            }
        }
        let entry = &self.chunk[self.chunk_idx];
        self.chunk_idx += 1;
        Ok(Some(entry))
    }

    /// Pull the next batch of entries into `out`. Returns false at the
    /// end of the stream.
    pub fn next_batch(&mut self, out: &mut Vec<QueryResultEntry>) -> Result<bool, QueryError> {
        if self.chunk_idx < self.chunk.len() {
            out.extend(self.chunk.drain(self.chunk_idx..));
            self.chunk.clear();
            self.chunk_idx = 0;
            return Ok(true);
        }
        let Some(get_chunk) = &mut self.get_chunk else {
            return Ok(false);
        };
        self.chunk.clear();
        self.chunk_idx = 0;
        get_chunk(&mut self.chunk)?;
        if self.chunk.is_empty() {
            return Ok(false);
        }
        out.append(&mut self.chunk);
        Ok(true)
    }

    /// Drain a streaming result into a materialized one.
    pub fn materialize(&mut self) -> Result<(), QueryError> {
        if self.materialized {
            return Ok(());
        }
        let mut entries = std::mem::take(&mut self.chunk);
        entries.drain(..self.chunk_idx);
        self.chunk_idx = 0;
        if let Some(mut get_chunk) = self.get_chunk.take() {
            let mut batch = Vec::new();
            loop {
                batch.clear();
                get_chunk(&mut batch)?;
                if batch.is_empty() {
                    break;
                }
                entries.append(&mut batch);
            }
        }
        self.chunk = entries;
        self.materialized = true;
        Ok(())
    }

    /// All entries of a materialized result.
    pub fn entries(&self) -> &[QueryResultEntry] {
        debug_assert!(self.materialized, "entries() requires a materialized result");
        &self.chunk
    }
}

/// Order two JSON values: nulls greatest (so they come last in an
/// ascending sort), then by value within a type.
pub fn compare_json_values(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
            Value::Null => 4,
        }
    }
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        (Value::Number(left), Value::Number(right)) => {
            let left = left.as_f64().unwrap_or(f64::NAN);
            let right = right.as_f64().unwrap_or(f64::NAN);
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        }
        (Value::String(left), Value::String(right)) => left.cmp(right),
        _ => rank(left).cmp(&rank(right)),
    }
}

/// Sort materialized entries by the given fields, with an optional
/// seeded tie-break over the entry's serialized form.
pub fn sort_entries(
    entries: &mut [QueryResultEntry],
    order_by: &[OrderByField],
    randomize_seed: Option<u64>,
) {
    entries.sort_by(|left, right| {
        for field in order_by {
            let ordering = compare_json_values(left.get(&field.field), right.get(&field.field));
            let ordering = if field.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        if let Some(seed) = randomize_seed {
            let hash = |entry: &QueryResultEntry| {
                xxh3_64_with_seed(
                    serde_json::to_string(&entry.fields)
                        .unwrap_or_default()
                        .as_bytes(),
                    seed,
                )
            };
            return hash(left).cmp(&hash(right));
        }
        Ordering::Equal
    });
}

/// Check the shared limit/offset constraints: `limit ≥ 1`, `offset ≥ 0`
/// (enforced by the unsigned types), and neither without an ordering.
pub fn validate_limit_offset(
    has_ordering: bool,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<(), QueryError> {
    if let Some(limit) = limit {
        if limit == 0 {
            return Err(QueryError::bad_request(
                "The limit must be greater than or equal to 1",
            ));
        }
    }
    if !has_ordering && (limit.is_some() || offset.is_some()) {
        return Err(QueryError::bad_request(
            "Offset and limit can only be applied if the output of the operation has some \
             ordering. Please provide orderByFields.",
        ));
    }
    Ok(())
}

/// Apply offset and limit to a materialized entry list.
pub fn apply_offset_limit(
    entries: Vec<QueryResultEntry>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Vec<QueryResultEntry> {
    let offset = offset.unwrap_or(0) as usize;
    let limit = limit.map(|limit| limit as usize).unwrap_or(usize::MAX);
    entries.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> QueryResultEntry {
        QueryResultEntry {
            fields: value.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_order_by_field_accepts_both_forms() {
        let plain: OrderByField = serde_json::from_value(json!("country")).unwrap();
        assert_eq!(plain.field, "country");
        assert!(plain.ascending);

        let explicit: OrderByField =
            serde_json::from_value(json!({"field": "count", "order": "descending"})).unwrap();
        assert_eq!(explicit.field, "count");
        assert!(!explicit.ascending);
    }

    #[test]
    fn test_generator_streams_batches_until_empty() {
        let mut remaining = 5u32;
        let mut result = QueryResult::from_generator(move |chunk| {
            let batch = remaining.min(2);
            for idx in 0..batch {
                chunk.push(entry(json!({"n": remaining - idx})));
            }
            remaining -= batch;
            Ok(())
        });
        let mut seen = Vec::new();
        while let Some(entry) = result.next_entry().unwrap() {
            seen.push(entry.get("n").as_u64().unwrap());
        }
        assert_eq!(seen, [5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_materialize_collects_everything() {
        let mut remaining = 3u32;
        let mut result = QueryResult::from_generator(move |chunk| {
            if remaining > 0 {
                chunk.push(entry(json!({"n": remaining})));
                remaining -= 1;
            }
            Ok(())
        });
        result.materialize().unwrap();
        assert!(result.is_materialized());
        assert_eq!(result.entries().len(), 3);
    }

    #[test]
    fn test_sort_entries_null_last_ascending_first_descending() {
        let mut entries = vec![
            entry(json!({"age": null})),
            entry(json!({"age": 13})),
            entry(json!({"age": 7})),
        ];
        sort_entries(
            &mut entries,
            &[OrderByField {
                field: "age".to_string(),
                ascending: true,
            }],
            None,
        );
        let ages: Vec<&Value> = entries.iter().map(|entry| entry.get("age")).collect();
        assert_eq!(ages, [&json!(7), &json!(13), &json!(null)]);

        sort_entries(
            &mut entries,
            &[OrderByField {
                field: "age".to_string(),
                ascending: false,
            }],
            None,
        );
        let ages: Vec<&Value> = entries.iter().map(|entry| entry.get("age")).collect();
        assert_eq!(ages, [&json!(null), &json!(13), &json!(7)]);
    }

    #[test]
    fn test_limit_offset_validation() {
        assert!(validate_limit_offset(true, Some(3), Some(1)).is_ok());
        assert!(validate_limit_offset(true, None, None).is_ok());
        assert!(validate_limit_offset(false, None, None).is_ok());
        assert!(validate_limit_offset(true, Some(0), None).is_err());
        let error = validate_limit_offset(false, Some(1), None).unwrap_err();
        assert!(error
            .to_string()
            .contains("Offset and limit can only be applied"));
    }

    #[test]
    fn test_apply_offset_limit() {
        let entries: Vec<_> = (0..5).map(|n| entry(json!({"n": n}))).collect();
        let sliced = apply_offset_limit(entries, Some(3), Some(1));
        let values: Vec<u64> = sliced
            .iter()
            .map(|entry| entry.get("n").as_u64().unwrap())
            .collect();
        assert_eq!(values, [1, 2, 3]);
    }
}
