//! The query driver: parse → compile per partition in parallel →
//! evaluate → hand the bitmaps to the action → stream the result.

use std::sync::Arc;
use std::time::Duration;

use query::{AmbiguityMode, Query, QueryError, QueryResult, QueryResultEntry};
use roaring::RoaringBitmap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Database;

/// Entries per emitted batch when streaming.
pub const STREAM_BATCH_SIZE: usize = 1024;
/// Minimum interval between emitted batches; the throttle that paces a
/// fast producer against a slow consumer.
pub const STREAM_BATCH_INTERVAL: Duration = Duration::from_millis(10);
/// Batches buffered ahead of the consumer before the producer blocks.
const STREAM_CHANNEL_CAPACITY: usize = 4;

impl Database {
    /// Execute one query: returns the action's result stream. The
    /// per-partition filter evaluation runs on blocking worker threads,
    /// one per partition, joined in partition order.
    pub async fn execute_query(
        &self,
        query_json: &str,
        cancellation: &CancellationToken,
    ) -> Result<QueryResult, QueryError> {
        let query = Query::parse(query_json)?;
        tracing::debug!(query = %query_json, "executing query");
        let query = Arc::new(query);

        let mut handles = Vec::with_capacity(self.table.partitions.len());
        for partition_idx in 0..self.table.partitions.len() {
            if cancellation.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let table = self.table.clone();
            let query = query.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                evaluate_partition(&table, &query, partition_idx)
            }));
        }

        let mut bitmaps = Vec::with_capacity(handles.len());
        for handle in handles {
            let bitmap = handle
                .await
                .map_err(|join_error| {
                    QueryError::Compilation(format!("partition worker failed: {join_error}"))
                })??;
            bitmaps.push(bitmap);
        }
        if cancellation.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        let table = self.table.clone();
        tokio::task::spawn_blocking(move || query.action.execute(&table, bitmaps))
            .await
            .map_err(|join_error| {
                QueryError::Compilation(format!("action worker failed: {join_error}"))
            })?
    }

    /// Execute a query and materialize every entry, for callers that do
    /// not stream.
    pub async fn execute_query_collect(
        &self,
        query_json: &str,
    ) -> Result<Vec<QueryResultEntry>, QueryError> {
        let cancellation = CancellationToken::new();
        let mut result = self.execute_query(query_json, &cancellation).await?;
        result.materialize()?;
        Ok(result.entries().to_vec())
    }
}

fn evaluate_partition(
    table: &storage::Table,
    query: &Query,
    partition_idx: usize,
) -> Result<RoaringBitmap, QueryError> {
    let partition = &table.partitions[partition_idx];
    let operator = query
        .filter_expression
        .compile(table, partition, AmbiguityMode::None)?;
    tracing::trace!(partition = partition_idx, plan = ?operator, "compiled filter");
    let result = operator.evaluate();
    debug_assert!(
        result.as_ref().max().map_or(true, |max| max < partition.sequence_count),
        "operator produced rows outside the partition"
    );
    Ok(result.into_bitmap())
}

/// Forward a result stream through a bounded channel, reslicing to
/// [`STREAM_BATCH_SIZE`] entries per batch and pacing emissions to at
/// most one batch per [`STREAM_BATCH_INTERVAL`]. Cancellation is
/// observed at every batch boundary.
pub fn spawn_result_stream(
    mut result: QueryResult,
    cancellation: CancellationToken,
) -> mpsc::Receiver<Result<Vec<QueryResultEntry>, QueryError>> {
    let (sender, receiver) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut carry: Vec<QueryResultEntry> = Vec::new();
        let mut last_emission: Option<tokio::time::Instant> = None;
        loop {
            if cancellation.is_cancelled() {
                let _ = sender.send(Err(QueryError::Cancelled)).await;
                return;
            }
            // Refill until a full batch or the end of the stream.
            let mut done = false;
            while carry.len() < STREAM_BATCH_SIZE {
                match result.next_batch(&mut carry) {
                    Ok(true) => {}
                    Ok(false) => {
                        done = true;
                        break;
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error)).await;
                        return;
                    }
                }
            }

            let batch: Vec<QueryResultEntry> = if carry.len() > STREAM_BATCH_SIZE {
                let rest = carry.split_off(STREAM_BATCH_SIZE);
                std::mem::replace(&mut carry, rest)
            } else {
                std::mem::take(&mut carry)
            };

            if !batch.is_empty() {
                if let Some(last) = last_emission {
                    tokio::time::sleep_until(last + STREAM_BATCH_INTERVAL).await;
                }
                last_emission = Some(tokio::time::Instant::now());
                if sender.send(Ok(batch)).await.is_err() {
                    return;
                }
            }
            if done && carry.is_empty() {
                return;
            }
        }
    });
    receiver
}

/// The error response body for one failed query.
pub fn error_response(error: &QueryError) -> serde_json::Value {
    serde_json::json!({
        "error": error.kind(),
        "message": error.to_string(),
    })
}
