use crate::config::Config;
use anyhow::Result;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use colored::Colorize;
use query_core::{Metric, QueryError, TimeRange, TimeSeriesQuery};
use query_distributed::{
    MergerRegistry, ShardingCoordinator, ShardingError, SpawningExecutor, SubQueryResult,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Shard result type used by the simulation
pub type Batches = Vec<RecordBatch>;

/// In-process stand-in for remote shards. Later metrics answer sooner so
/// results come back out of order.
pub struct SimulatedShards {
    metrics: Vec<String>,
    latency_ms: u64,
    points: usize,
    fail_metric: Option<String>,
}

impl SimulatedShards {
    pub fn new(metrics: Vec<String>, config: &Config, fail_metric: Option<String>) -> Self {
        Self {
            metrics,
            latency_ms: config.latency_ms,
            points: config.points,
            fail_metric,
        }
    }

    /// Later metrics in the query answer sooner
    fn delay_for(&self, position: usize) -> Duration {
        let remaining = self.metrics.len().saturating_sub(position) as u64;
        Duration::from_millis(self.latency_ms.saturating_mul(remaining))
    }

    /// Answer one single-metric sub query
    pub async fn fetch(&self, sub_query: TimeSeriesQuery) -> SubQueryResult<Batches> {
        let metric = sub_query
            .metrics
            .first()
            .map(|m| m.metric.clone())
            .ok_or_else(|| QueryError::ExecutionError("sub query has no metric".to_string()))?;
        let position = self
            .metrics
            .iter()
            .position(|m| *m == metric)
            .unwrap_or(0);

        tokio::time::sleep(self.delay_for(position)).await;

        if self.fail_metric.as_deref() == Some(metric.as_str()) {
            tracing::debug!("Simulated failure for {}", metric);
            return Err(QueryError::ExecutionError(format!(
                "shard for '{}' is unavailable",
                metric
            )));
        }

        let batch = metric_batch(&metric, position, &sub_query.time, self.points)?;
        tracing::debug!("Shard {} returned {} rows", metric, batch.num_rows());
        Ok(vec![batch])
    }
}

/// Build `points` evenly spaced samples of one metric
pub fn metric_batch(
    metric: &str,
    position: usize,
    time: &TimeRange,
    points: usize,
) -> std::result::Result<RecordBatch, ArrowError> {
    let step = time.duration_ms() / points.max(1) as i64;
    let timestamps: Vec<i64> = (0..points).map(|i| time.start_ms + step * i as i64).collect();
    let values: Vec<f64> = (0..points)
        .map(|i| (position * 100) as f64 + i as f64 * 1.5)
        .collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("metric", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(timestamps)),
        Arc::new(StringArray::from(vec![metric; points])),
        Arc::new(Float64Array::from(values)),
    ];
    RecordBatch::try_new(schema, columns)
}

/// Query over the last hour for the given metrics
pub fn build_query(metrics: &[String]) -> TimeSeriesQuery {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    metrics.iter().fold(
        TimeSeriesQuery::new(TimeRange::new(now - 3_600_000, now)),
        |query, metric| query.with_metric(Metric::new(metric.as_str())),
    )
}

/// Run a query through the sharding coordinator against simulated shards
pub async fn execute_sharded(
    config: &Config,
    metrics: &[String],
    fail_metric: Option<String>,
    cancel_after_ms: Option<u64>,
) -> std::result::Result<Batches, ShardingError> {
    let shards = Arc::new(SimulatedShards::new(metrics.to_vec(), config, fail_metric));
    let downstream = SpawningExecutor::new(move |sub_query: TimeSeriesQuery| {
        let shards = Arc::clone(&shards);
        async move { shards.fetch(sub_query).await }
    });

    let coordinator = ShardingCoordinator::builder()
        .config(config.sharding.clone())
        .mergers(Arc::new(MergerRegistry::<Batches>::with_defaults()))
        .downstream(Arc::new(downstream))
        .build()?;

    let query = build_query(metrics);
    let handle = coordinator.execute(&query, None)?;

    if let Some(delay) = cancel_after_ms {
        let execution = Arc::clone(handle.execution());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            tracing::info!("Cancelling {} after {}ms", execution.id(), delay);
            execution.cancel();
        });
    }

    handle.await
}

pub async fn run_query(
    config: &Config,
    metrics: &[String],
    fail_metric: Option<String>,
    cancel_after_ms: Option<u64>,
) -> Result<()> {
    config.validate()?;
    if metrics.is_empty() {
        anyhow::bail!("At least one metric is required");
    }

    let start = Instant::now();
    println!(
        "{} Sharding {} metrics, {} at a time, merge '{}'",
        "→".bright_blue(),
        metrics.len(),
        config.sharding.parallel_executors,
        config.sharding.merge_strategy.bright_cyan()
    );

    match execute_sharded(config, metrics, fail_metric, cancel_after_ms).await {
        Ok(batches) => {
            let elapsed = start.elapsed();
            println!("{}", pretty_format_batches(&batches)?);
            let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
            println!(
                "{} {} rows in {} batches",
                "✓".bright_green(),
                rows,
                batches.len()
            );
            println!(
                "{} {:.2}ms",
                "Execution time:".bright_yellow(),
                elapsed.as_secs_f64() * 1000.0
            );
            Ok(())
        }
        Err(e) => {
            let label = if e.is_cancellation() {
                "Cancelled".bright_yellow()
            } else {
                "Failed".bright_red()
            };
            println!("{} {} (status {}): {}", "✗".bright_red(), label, e.status_code(), e);
            Err(e.into())
        }
    }
}

pub fn show_config(config: &Config, save: Option<&Path>) -> Result<()> {
    config.validate()?;
    let strategies = MergerRegistry::<Batches>::with_defaults().strategies();
    if !strategies.contains(&config.sharding.merge_strategy) {
        anyhow::bail!(
            "Unknown merge strategy '{}' (known: {})",
            config.sharding.merge_strategy,
            strategies.join(", ")
        );
    }

    println!("{}", "Sharding configuration:".bright_yellow().bold());
    println!("{}", serde_json::to_string_pretty(config)?);
    println!(
        "{} {}",
        "Merge strategies:".bright_yellow(),
        strategies.join(", ").bright_cyan()
    );

    if let Some(path) = save {
        config.save(path)?;
        println!("{} Saved to {:?}", "✓".bright_green(), path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    fn metrics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fast_config(parallel: usize, merge: &str) -> Config {
        Config::default().with_overrides(Some(parallel), Some(merge.to_string()), Some(2), Some(4))
    }

    fn metric_column(batch: &RecordBatch) -> String {
        let column = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        column.value(0).to_string()
    }

    #[test]
    fn test_metric_batch_layout() {
        let batch = metric_batch("cpu", 2, &TimeRange::new(0, 1000), 4).unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.num_columns(), 3);

        let timestamps = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(timestamps.value(0), 0);
        assert_eq!(timestamps.value(3), 750);
        assert_eq!(metric_column(&batch), "cpu");
    }

    #[test]
    fn test_build_query() {
        let query = build_query(&metrics(&["a", "b"]));
        assert_eq!(query.metrics.len(), 2);
        assert_eq!(query.time.duration_ms(), 3_600_000);
    }

    #[test]
    fn test_huge_latency_saturates() {
        let config = Config::default().with_overrides(None, None, Some(u64::MAX), None);
        let shards = SimulatedShards::new(metrics(&["a", "b", "c"]), &config, None);
        assert_eq!(shards.delay_for(0), Duration::from_millis(u64::MAX));
        assert_eq!(shards.delay_for(2), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_show_config_saves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json");
        let config = fast_config(6, "coalesce");

        show_config(&config, Some(&path)).unwrap();

        let saved = Config::from_file(&path).unwrap();
        assert_eq!(saved.sharding.parallel_executors, 6);
        assert_eq!(saved.sharding.merge_strategy, "coalesce");
    }

    #[tokio::test]
    async fn test_concat_keeps_metric_order() {
        let names = metrics(&["cpu", "mem", "disk", "net"]);
        let batches = execute_sharded(&fast_config(2, "concat"), &names, None, None)
            .await
            .unwrap();

        let order: Vec<String> = batches.iter().map(metric_column).collect();
        assert_eq!(order, names);
    }

    #[tokio::test]
    async fn test_coalesce_returns_one_batch() {
        let names = metrics(&["cpu", "mem", "disk"]);
        let batches = execute_sharded(&fast_config(3, "coalesce"), &names, None, None)
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 12);
        assert_eq!(batches[0].column(1).len(), 12);
    }

    #[tokio::test]
    async fn test_largest_picks_first_on_tie() {
        let names = metrics(&["cpu", "mem"]);
        let batches = execute_sharded(&fast_config(1, "largest"), &names, None, None)
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(metric_column(&batches[0]), "cpu");
    }

    #[tokio::test]
    async fn test_failing_shard() {
        let names = metrics(&["cpu", "mem", "disk"]);
        let err = execute_sharded(&fast_config(2, "concat"), &names, Some("mem".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShardingError::SubQuery { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancel_after_delay() {
        let names = metrics(&["cpu", "mem"]);
        let slow = Config::default().with_overrides(Some(1), None, Some(5_000), None);
        let err = execute_sharded(&slow, &names, None, Some(10))
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_unknown_merge_strategy() {
        let names = metrics(&["cpu"]);
        let err = execute_sharded(&fast_config(2, "median"), &names, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShardingError::Configuration(_)));
        assert!(show_config(&fast_config(2, "median"), None).is_err());
    }
}
