//! Built-in mergers for Arrow shard results
//!
//! Each shard returns its time series as a list of record batches. These
//! mergers combine the per-shard lists, always visiting shards in shard order.

use crate::merger::Merger;
use arrow::record_batch::RecordBatch;
use query_core::QueryError;

/// Total rows across a shard's batches
fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

/// Keeps the shard result with the most rows; ties go to the earliest shard
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestMerger;

impl Merger<Vec<RecordBatch>> for LargestMerger {
    fn strategy(&self) -> &str {
        "largest"
    }

    fn merge(&self, results: Vec<Vec<RecordBatch>>) -> Result<Vec<RecordBatch>, QueryError> {
        let mut largest: Option<(usize, Vec<RecordBatch>)> = None;
        for shard in results {
            let rows = row_count(&shard);
            let is_larger = largest.as_ref().map_or(true, |(best, _)| rows > *best);
            if is_larger {
                largest = Some((rows, shard));
            }
        }
        Ok(largest.map(|(_, batches)| batches).unwrap_or_default())
    }
}

/// Simple concatenation of every shard's batches
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatMerger;

impl Merger<Vec<RecordBatch>> for ConcatMerger {
    fn strategy(&self) -> &str {
        "concat"
    }

    fn merge(&self, results: Vec<Vec<RecordBatch>>) -> Result<Vec<RecordBatch>, QueryError> {
        Ok(results.into_iter().flatten().collect())
    }
}

/// Concatenates every shard's batches into a single batch.
///
/// All batches must share one schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoalesceMerger;

impl Merger<Vec<RecordBatch>> for CoalesceMerger {
    fn strategy(&self) -> &str {
        "coalesce"
    }

    fn merge(&self, results: Vec<Vec<RecordBatch>>) -> Result<Vec<RecordBatch>, QueryError> {
        let batches: Vec<RecordBatch> = results.into_iter().flatten().collect();
        let Some(first) = batches.first() else {
            return Ok(vec![]);
        };

        let schema = first.schema();
        if let Some(position) = batches.iter().position(|b| b.schema() != schema) {
            return Err(QueryError::MergeError(format!(
                "Batch {} has a different schema than batch 0",
                position
            )));
        }

        let combined = arrow::compute::concat_batches(&schema, &batches)?;
        Ok(vec![combined])
    }
}
