//! Sharding coordinator
//!
//! Validates the sharding configuration once, resolves the merger and the
//! downstream executor, and creates one [`SplitExecution`] per incoming query.

use crate::config::ShardingConfig;
use crate::downstream::DownstreamExecutor;
use crate::error::{Result, ShardingError};
use crate::execution::{ExecutionHandle, SplitExecution};
use crate::merger::{Merger, MergerRegistry};
use crate::registry::OutstandingExecutions;
use query_core::TimeSeriesQuery;
use query_planner::{QuerySplitter, SplitMetricPlanner};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Fans a query out to its shards with bounded parallelism and merges the results
pub struct ShardingCoordinator<T> {
    config: ShardingConfig,
    merger: Arc<dyn Merger<T>>,
    downstream: Arc<dyn DownstreamExecutor<T>>,
    splitter: Arc<dyn QuerySplitter>,
    outstanding: Arc<OutstandingExecutions>,
    runtime: Handle,
}

impl<T: Send + 'static> ShardingCoordinator<T> {
    pub fn builder() -> ShardingCoordinatorBuilder<T> {
        ShardingCoordinatorBuilder::new()
    }

    /// Split `query` and start executing its sub queries.
    ///
    /// Returns as soon as the initial window is dispatched. Planning errors
    /// and empty splits are reported here; everything later arrives through
    /// the returned handle.
    pub fn execute(
        &self,
        query: &TimeSeriesQuery,
        override_config: Option<&ShardingConfig>,
    ) -> Result<ExecutionHandle<T>> {
        let sub_queries = self.splitter.split(query)?;
        if sub_queries.is_empty() {
            return Err(ShardingError::EmptySplit { query_id: query.id });
        }

        let window_size = self.parallelism_for(override_config);
        let (execution, outcome) = SplitExecution::new(
            query.clone(),
            sub_queries,
            window_size,
            Arc::clone(&self.downstream),
            Arc::clone(&self.merger),
            Arc::clone(&self.outstanding),
            self.runtime.clone(),
        );
        self.outstanding.register(execution.id(), execution.clone());

        tracing::info!(
            "Executing query {} as {} with {} sub queries, window {}",
            query.id,
            execution.id(),
            execution.sub_queries().len(),
            window_size
        );
        execution.start();
        Ok(ExecutionHandle::new(execution, outcome))
    }

    /// Effective window size, honoring a positive per-query override
    fn parallelism_for(&self, override_config: Option<&ShardingConfig>) -> usize {
        match override_config {
            Some(c) if c.parallel_executors > 0 => c.parallel_executors,
            _ => self.config.parallel_executors,
        }
    }

    /// Default number of concurrent sub queries
    pub fn parallelism(&self) -> usize {
        self.config.parallel_executors
    }

    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }

    pub fn merger(&self) -> &Arc<dyn Merger<T>> {
        &self.merger
    }

    pub fn outstanding(&self) -> &Arc<OutstandingExecutions> {
        &self.outstanding
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Cancel every execution that has not completed yet
    pub fn cancel_all(&self) -> usize {
        self.outstanding.cancel_all()
    }
}

/// Builder for [`ShardingCoordinator`]; all checks happen in [`build`](Self::build)
pub struct ShardingCoordinatorBuilder<T> {
    config: Option<ShardingConfig>,
    mergers: Option<Arc<MergerRegistry<T>>>,
    downstream: Option<Arc<dyn DownstreamExecutor<T>>>,
    splitter: Option<Arc<dyn QuerySplitter>>,
    outstanding: Option<Arc<OutstandingExecutions>>,
    runtime: Option<Handle>,
}

impl<T: Send + 'static> ShardingCoordinatorBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: None,
            mergers: None,
            downstream: None,
            splitter: None,
            outstanding: None,
            runtime: None,
        }
    }

    pub fn config(mut self, config: ShardingConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn mergers(mut self, mergers: Arc<MergerRegistry<T>>) -> Self {
        self.mergers = Some(mergers);
        self
    }

    pub fn downstream(mut self, downstream: Arc<dyn DownstreamExecutor<T>>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Defaults to [`SplitMetricPlanner`]
    pub fn splitter(mut self, splitter: Arc<dyn QuerySplitter>) -> Self {
        self.splitter = Some(splitter);
        self
    }

    /// Share a registry with other coordinators for bulk cancellation
    pub fn outstanding(mut self, outstanding: Arc<OutstandingExecutions>) -> Self {
        self.outstanding = Some(outstanding);
        self
    }

    /// Runtime for the completion driver; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ShardingCoordinator<T>> {
        let config = self
            .config
            .ok_or_else(|| ShardingError::Configuration("Sharding config is missing".into()))?;
        config.validate()?;

        let mergers = self
            .mergers
            .ok_or_else(|| ShardingError::Configuration("No merger registry given".into()))?;
        let merger = mergers.get(&config.merge_strategy).ok_or_else(|| {
            ShardingError::Configuration(format!(
                "No merger registered for strategy '{}' (known: {})",
                config.merge_strategy,
                mergers.strategies().join(", ")
            ))
        })?;

        let downstream = self.downstream.ok_or_else(|| {
            ShardingError::Configuration("No downstream executor available".into())
        })?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                ShardingError::Configuration(format!("No tokio runtime available: {}", e))
            })?,
        };

        tracing::debug!(
            "Sharding coordinator ready: parallelism {}, merge '{}'",
            config.parallel_executors,
            config.merge_strategy
        );

        Ok(ShardingCoordinator {
            config,
            merger,
            downstream,
            splitter: self
                .splitter
                .unwrap_or_else(|| Arc::new(SplitMetricPlanner::new())),
            outstanding: self
                .outstanding
                .unwrap_or_else(|| Arc::new(OutstandingExecutions::new())),
            runtime,
        })
    }
}

impl<T: Send + 'static> Default for ShardingCoordinatorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
