//! Sharded execution for Query Engine
//!
//! This crate fans a time-series query out to one sub query per metric shard,
//! runs the sub queries against a downstream executor with bounded
//! parallelism, and merges the shard results back into one result.
//!
//! # Architecture
//!
//! - **ShardingCoordinator**: validates configuration and starts one execution per query
//! - **SplitExecution**: sliding dispatch window, failure and cancellation handling, merge trigger
//! - **Mergers**: combine shard results in shard order
//! - **OutstandingExecutions**: registry of running executions for bulk cancellation
//!
//! # Example
//!
//! ```ignore
//! use query_distributed::{MergerRegistry, ShardingConfig, ShardingCoordinator, SpawningExecutor};
//! use std::sync::Arc;
//!
//! let coordinator = ShardingCoordinator::builder()
//!     .config(ShardingConfig::new(4).with_merge_strategy("concat"))
//!     .mergers(Arc::new(MergerRegistry::with_defaults()))
//!     .downstream(Arc::new(SpawningExecutor::new(run_shard)))
//!     .build()?;
//!
//! let batches = coordinator.execute(&query, None)?.await?;
//! ```
//!
//! # Modules
//!
//! - [`coordinator`]: Coordinator and its builder
//! - [`execution`]: Per query split execution
//! - [`downstream`]: Sub query handles and downstream executors
//! - [`merger`]: Merger trait and registry
//! - [`operators`]: Built-in Arrow batch mergers
//! - [`registry`]: Outstanding execution registry
//! - [`config`]: Sharding configuration

pub mod config;
pub mod coordinator;
pub mod downstream;
pub mod error;
pub mod execution;
pub mod merger;
pub mod operators;
pub mod registry;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-exports
pub use config::{ShardingConfig, DEFAULT_EXECUTOR_TYPE, DEFAULT_MERGE_STRATEGY};
pub use coordinator::{ShardingCoordinator, ShardingCoordinatorBuilder};
pub use downstream::{
    Cancellable, DownstreamExecutor, SpawningExecutor, SubQueryCompleter, SubQueryHandle,
    SubQueryResult,
};
pub use error::{Result, ShardingError};
pub use execution::{ExecutionHandle, SplitExecution};
pub use merger::{FnMerger, Merger, MergerRegistry};
pub use operators::{CoalesceMerger, ConcatMerger, LargestMerger};
pub use registry::OutstandingExecutions;
pub use types::*;
