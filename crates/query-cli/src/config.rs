use anyhow::Result;
use query_distributed::ShardingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for the simulated sharded run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub sharding: ShardingConfig,
    /// Base latency of one simulated shard
    pub latency_ms: u64,
    /// Data points per metric
    pub points: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sharding: ShardingConfig::new(4),
            latency_ms: 20,
            points: 5,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply command line overrides on top of the file settings
    pub fn with_overrides(
        mut self,
        parallel: Option<usize>,
        merge: Option<String>,
        latency_ms: Option<u64>,
        points: Option<usize>,
    ) -> Self {
        if let Some(parallel) = parallel {
            self.sharding.parallel_executors = parallel;
        }
        if let Some(merge) = merge {
            self.sharding.merge_strategy = merge;
        }
        if let Some(latency_ms) = latency_ms {
            self.latency_ms = latency_ms;
        }
        if let Some(points) = points {
            self.points = points;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.sharding.validate()?;
        if self.points == 0 {
            anyhow::bail!("points must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.json");

        let config = Config::default().with_overrides(Some(2), Some("concat".into()), None, Some(3));
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.sharding, config.sharding);
        assert_eq!(loaded.points, 3);
        assert_eq!(loaded.latency_ms, 20);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"sharding": {"parallelExecutors": 8}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sharding.parallel_executors, 8);
        assert_eq!(config.sharding.merge_strategy, "largest");
        assert_eq!(config.points, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_settings() {
        let zero_parallel = Config::default().with_overrides(Some(0), None, None, None);
        assert!(zero_parallel.validate().is_err());

        let zero_points = Config::default().with_overrides(None, None, None, Some(0));
        assert!(zero_points.validate().is_err());
    }

    #[test]
    fn test_bad_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
