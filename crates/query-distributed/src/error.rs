//! Error types for sharded execution

use query_core::{QueryError, QueryId};
use thiserror::Error;

/// Errors surfaced by the sharding coordinator and its executions
#[derive(Error, Debug)]
pub enum ShardingError {
    /// Invalid or missing configuration, detected at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The query decomposed into zero sub queries
    #[error("Query {query_id} didn't have any sub queries after planning")]
    EmptySplit { query_id: QueryId },

    /// The splitter could not decompose the query
    #[error("Planning failed: {0}")]
    Planning(#[from] QueryError),

    /// A downstream sub query failed
    #[error("Sub query {index} of query with order {order} failed: {source}")]
    SubQuery {
        index: usize,
        order: u32,
        #[source]
        source: QueryError,
    },

    /// The execution was cancelled by the caller or by a failing sibling
    #[error("Query with order {order} was cancelled: {reason}")]
    Cancelled { order: u32, reason: String },

    /// The merger itself failed while combining shard results
    #[error("Unexpected exception merging results for query with order {order}: {source}")]
    Merge {
        order: u32,
        #[source]
        source: QueryError,
    },

    /// Configuration JSON could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShardingError {
    /// HTTP-style status code for reporting upstream
    pub fn status_code(&self) -> u16 {
        match self {
            ShardingError::Configuration(_)
            | ShardingError::EmptySplit { .. }
            | ShardingError::Planning(_)
            | ShardingError::Serialization(_)
            | ShardingError::Io(_)
            | ShardingError::Cancelled { .. } => 400,
            ShardingError::SubQuery { .. } | ShardingError::Merge { .. } => 500,
        }
    }

    /// Whether this error means "told to stop" rather than "something broke"
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ShardingError::Cancelled { .. })
    }

    /// Ordering metadata of the query the error belongs to, if any
    pub fn order(&self) -> Option<u32> {
        match self {
            ShardingError::SubQuery { order, .. }
            | ShardingError::Cancelled { order, .. }
            | ShardingError::Merge { order, .. } => Some(*order),
            _ => None,
        }
    }
}

/// Result type for sharding operations
pub type Result<T> = std::result::Result<T, ShardingError>;
