//! Merger registry
//!
//! A [`Merger`] combines the per-shard results of a split query into one
//! result. Mergers are looked up by strategy key when a coordinator is built.

use crate::operators::{CoalesceMerger, ConcatMerger, LargestMerger};
use arrow::record_batch::RecordBatch;
use query_core::QueryError;
use std::collections::HashMap;
use std::sync::Arc;

/// Combines shard results, given in shard order, into one result
pub trait Merger<T>: Send + Sync {
    /// Key this merger is registered under
    fn strategy(&self) -> &str;

    /// Merge the results of every shard. `results[i]` is the result of sub query `i`.
    fn merge(&self, results: Vec<T>) -> Result<T, QueryError>;
}

/// Merger backed by a closure
pub struct FnMerger<F> {
    strategy: String,
    merge: F,
}

impl<F> FnMerger<F> {
    pub fn new(strategy: impl Into<String>, merge: F) -> Self {
        Self {
            strategy: strategy.into(),
            merge,
        }
    }
}

impl<T, F> Merger<T> for FnMerger<F>
where
    F: Fn(Vec<T>) -> Result<T, QueryError> + Send + Sync,
{
    fn strategy(&self) -> &str {
        &self.strategy
    }

    fn merge(&self, results: Vec<T>) -> Result<T, QueryError> {
        (self.merge)(results)
    }
}

/// Mergers keyed by strategy name
pub struct MergerRegistry<T> {
    mergers: HashMap<String, Arc<dyn Merger<T>>>,
}

impl<T> MergerRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            mergers: HashMap::new(),
        }
    }

    /// Register a merger under its strategy key, returning any merger it replaced
    pub fn register(&mut self, merger: Arc<dyn Merger<T>>) -> Option<Arc<dyn Merger<T>>> {
        self.mergers.insert(merger.strategy().to_string(), merger)
    }

    /// Register a closure as a merger
    pub fn register_fn<F>(&mut self, strategy: impl Into<String>, merge: F) -> Option<Arc<dyn Merger<T>>>
    where
        F: Fn(Vec<T>) -> Result<T, QueryError> + Send + Sync + 'static,
        T: 'static,
    {
        self.register(Arc::new(FnMerger::new(strategy, merge)))
    }

    /// Look up a merger
    pub fn get(&self, strategy: &str) -> Option<Arc<dyn Merger<T>>> {
        self.mergers.get(strategy).cloned()
    }

    /// Registered strategy keys, sorted
    pub fn strategies(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.mergers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.mergers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mergers.is_empty()
    }
}

impl<T> Default for MergerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl MergerRegistry<Vec<RecordBatch>> {
    /// Registry with the built-in Arrow batch mergers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LargestMerger));
        registry.register(Arc::new(ConcatMerger));
        registry.register(Arc::new(CoalesceMerger));
        registry
    }
}
