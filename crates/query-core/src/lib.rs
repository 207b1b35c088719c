//! Core query model shared by the planner, the sharding coordinator and the CLI.

pub mod error;
pub mod types;

pub use error::{QueryError, Result};
pub use types::*;
