//! Sharding executor configuration

use crate::error::{Result, ShardingError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Merge strategy used when none is configured
pub const DEFAULT_MERGE_STRATEGY: &str = "largest";

/// Executor type recorded in configs that don't name one
pub const DEFAULT_EXECUTOR_TYPE: &str = "MetricShardingExecutor";

/// Configuration for a metric sharding node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingConfig {
    /// ID of the pipeline node this config belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<String>,
    /// Type name of the executor
    #[serde(default = "default_executor_type")]
    pub executor_type: String,
    /// How many sub queries may run concurrently
    pub parallel_executors: usize,
    /// Key of the merger used to combine shard results
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: String,
}

fn default_executor_type() -> String {
    DEFAULT_EXECUTOR_TYPE.to_string()
}

fn default_merge_strategy() -> String {
    DEFAULT_MERGE_STRATEGY.to_string()
}

impl ShardingConfig {
    /// Create a config with the given parallelism and the default merge strategy
    pub fn new(parallel_executors: usize) -> Self {
        Self {
            executor_id: None,
            executor_type: default_executor_type(),
            parallel_executors,
            merge_strategy: default_merge_strategy(),
        }
    }

    /// Set the merge strategy
    pub fn with_merge_strategy(mut self, merge_strategy: impl Into<String>) -> Self {
        self.merge_strategy = merge_strategy.into();
        self
    }

    /// Set the executor ID
    pub fn with_executor_id(mut self, executor_id: impl Into<String>) -> Self {
        self.executor_id = Some(executor_id.into());
        self
    }

    /// Set the parallelism
    pub fn with_parallel_executors(mut self, parallel_executors: usize) -> Self {
        self.parallel_executors = parallel_executors;
        self
    }

    /// Check the values a coordinator needs before it can be built
    pub fn validate(&self) -> Result<()> {
        if self.parallel_executors < 1 {
            return Err(ShardingError::Configuration(
                "Parallel executors must be one or greater.".to_string(),
            ));
        }
        if self.merge_strategy.trim().is_empty() {
            return Err(ShardingError::Configuration(
                "Merge strategy cannot be empty.".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a config from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
