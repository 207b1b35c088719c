//! Core types for sharded execution

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one split execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new random execution ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a split execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Filling the initial window
    Dispatching,
    /// Every permitted slot is launched, waiting on completions
    WindowFull,
    /// All sub queries dispatched; merging once the last one succeeds
    Merging,
    /// Merged result delivered
    Succeeded,
    /// Sub query or merge error delivered
    Failed,
    /// Cancellation delivered
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Dispatching => write!(f, "Dispatching"),
            ExecutionState::WindowFull => write!(f, "WindowFull"),
            ExecutionState::Merging => write!(f, "Merging"),
            ExecutionState::Succeeded => write!(f, "Succeeded"),
            ExecutionState::Failed => write!(f, "Failed"),
            ExecutionState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Point-in-time view of an execution's window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Number of sub queries
    pub total: usize,
    /// Effective parallelism
    pub window_size: usize,
    /// Sub queries handed to the downstream executor
    pub dispatched: usize,
    /// Sub queries that returned a result
    pub succeeded: usize,
    pub state: ExecutionState,
}

impl WindowSnapshot {
    /// Dispatched sub queries still awaiting a result
    pub fn in_flight(&self) -> usize {
        if self.state.is_terminal() {
            0
        } else {
            self.dispatched.saturating_sub(self.succeeded)
        }
    }
}
