//! Metric splitting planner

use query_core::{QueryId, Result, TimeSeriesQuery};

/// Decomposes a query into independently executable sub queries.
///
/// The order of the returned sub queries is significant: results are merged
/// back in exactly this order.
pub trait QuerySplitter: Send + Sync {
    fn split(&self, query: &TimeSeriesQuery) -> Result<Vec<TimeSeriesQuery>>;
}

/// Splits a query into one sub query per metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitMetricPlanner;

impl SplitMetricPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl QuerySplitter for SplitMetricPlanner {
    fn split(&self, query: &TimeSeriesQuery) -> Result<Vec<TimeSeriesQuery>> {
        query.validate()?;

        let sub_queries: Vec<TimeSeriesQuery> = query
            .metrics
            .iter()
            .map(|metric| TimeSeriesQuery {
                id: QueryId::new(),
                parent: Some(query.id),
                order: query.order,
                time: query.time,
                metrics: vec![metric.clone()],
            })
            .collect();

        tracing::debug!(
            "Split {} into {} sub queries",
            query.id,
            sub_queries.len()
        );
        Ok(sub_queries)
    }
}
