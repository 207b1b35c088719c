//! Query planning for sharded execution.
//!
//! Turns one [`TimeSeriesQuery`](query_core::TimeSeriesQuery) into an ordered
//! list of sub queries that can be executed independently.

pub mod splitter;

pub use splitter::{QuerySplitter, SplitMetricPlanner};
