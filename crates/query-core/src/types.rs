use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a query or sub query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    /// Create a new random query ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query-{}", &self.0.to_string()[..8])
    }
}

/// Time span covered by a query, in epoch milliseconds (end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn is_valid(&self) -> bool {
        self.start_ms < self.end_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// A single metric selector within a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// Query-local identifier, unique within one query
    pub id: String,
    /// Metric name, e.g. `sys.cpu.user`
    pub metric: String,
    /// Optional downsampling/group-by aggregator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<String>,
    /// Tag filters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Metric {
    /// Create a metric selector whose id is the metric name
    pub fn new(metric: impl Into<String>) -> Self {
        let metric = metric.into();
        Self {
            id: metric.clone(),
            metric,
            aggregator: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_aggregator(mut self, aggregator: impl Into<String>) -> Self {
        self.aggregator = Some(aggregator.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A time-series query over one or more metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesQuery {
    #[serde(default)]
    pub id: QueryId,
    /// The query this one was split from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<QueryId>,
    /// Position of this query within a multi-query request
    #[serde(default)]
    pub order: u32,
    pub time: TimeRange,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl TimeSeriesQuery {
    pub fn new(time: TimeRange) -> Self {
        Self {
            id: QueryId::new(),
            parent: None,
            order: 0,
            time,
            metrics: Vec::new(),
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Check the query is well formed before planning
    pub fn validate(&self) -> Result<()> {
        if !self.time.is_valid() {
            return Err(QueryError::PlanningError(format!(
                "Invalid time range for {}: start {} is not before end {}",
                self.id, self.time.start_ms, self.time.end_ms
            )));
        }

        let mut seen = HashSet::with_capacity(self.metrics.len());
        for metric in &self.metrics {
            if !seen.insert(metric.id.as_str()) {
                return Err(QueryError::PlanningError(format!(
                    "Duplicate metric id '{}' in {}",
                    metric.id, self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_display() {
        let id = QueryId::new();
        let display = id.to_string();
        assert!(display.starts_with("query-"));
        assert_eq!(display.len(), "query-".len() + 8);
    }

    #[test]
    fn test_time_range() {
        assert!(TimeRange::new(0, 1000).is_valid());
        assert!(!TimeRange::new(1000, 1000).is_valid());
        assert_eq!(TimeRange::new(500, 1500).duration_ms(), 1000);
    }

    #[test]
    fn test_validate_rejects_bad_range() {
        let query = TimeSeriesQuery::new(TimeRange::new(10, 5)).with_metric(Metric::new("a"));
        assert!(matches!(
            query.validate(),
            Err(QueryError::PlanningError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_metric_ids() {
        let query = TimeSeriesQuery::new(TimeRange::new(0, 10))
            .with_metric(Metric::new("sys.cpu.user").with_id("m1"))
            .with_metric(Metric::new("sys.cpu.nice").with_id("m1"));
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "order": 3,
            "time": { "startMs": 0, "endMs": 60000 },
            "metrics": [ { "id": "m0", "metric": "sys.cpu.user", "tags": { "host": "web01" } } ]
        }"#;
        let query: TimeSeriesQuery = serde_json::from_str(json).unwrap();
        assert_eq!(query.order, 3);
        assert_eq!(query.metrics[0].tags.get("host").map(String::as_str), Some("web01"));
        assert!(query.parent.is_none());
        assert!(query.validate().is_ok());
    }
}
