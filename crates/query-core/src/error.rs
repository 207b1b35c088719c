use thiserror::Error;

/// Errors raised by the collaborators of a sharded query: splitters,
/// downstream executors and mergers.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Merge error: {0}")]
    MergeError(String),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
}

pub type Result<T> = std::result::Result<T, QueryError>;
