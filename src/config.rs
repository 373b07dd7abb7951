//! Configuration Module
//!
//! Handles loading and validating cache configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of independently locked shards backing the store
    pub shard_count: usize,
    /// Maximum number of entries before capacity compaction kicks in, None = unbounded
    pub max_entries: Option<usize>,
    /// Fraction of the capacity freed by one compaction pass
    pub compaction_percentage: f64,
    /// Background expiration scan interval in milliseconds
    pub scan_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_SHARDS` - Number of store shards (default: 16)
    /// - `CACHE_MAX_ENTRIES` - Capacity before compaction (default: unbounded)
    /// - `CACHE_COMPACTION_PERCENTAGE` - Fraction freed per compaction (default: 0.05)
    /// - `CACHE_SCAN_INTERVAL_MS` - Expiration scan frequency (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            shard_count: parse_env("CACHE_SHARDS").unwrap_or(defaults.shard_count),
            max_entries: parse_env("CACHE_MAX_ENTRIES").or(defaults.max_entries),
            compaction_percentage: parse_env("CACHE_COMPACTION_PERCENTAGE")
                .unwrap_or(defaults.compaction_percentage),
            scan_interval_ms: parse_env("CACHE_SCAN_INTERVAL_MS")
                .unwrap_or(defaults.scan_interval_ms),
        }
    }

    // == Validate ==
    /// Rejects configurations the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(CacheError::InvalidConfig(
                "shard_count must be greater than zero".to_string(),
            ));
        }
        if self.max_entries == Some(0) {
            return Err(CacheError::InvalidConfig(
                "max_entries must be greater than zero when set".to_string(),
            ));
        }
        if !(self.compaction_percentage > 0.0 && self.compaction_percentage <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "compaction_percentage must be in (0, 1], got {}",
                self.compaction_percentage
            )));
        }
        if self.scan_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "scan_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Background scan interval as a `Duration`.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: 16,
            max_entries: None,
            compaction_percentage: 0.05,
            scan_interval_ms: 60_000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.shard_count, 16);
        assert_eq!(config.max_entries, None);
        assert_eq!(config.compaction_percentage, 0.05);
        assert_eq!(config.scan_interval_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_SHARDS");
        env::remove_var("CACHE_MAX_ENTRIES");
        env::remove_var("CACHE_COMPACTION_PERCENTAGE");
        env::remove_var("CACHE_SCAN_INTERVAL_MS");

        let config = Config::from_env();
        assert_eq!(config.shard_count, 16);
        assert_eq!(config.max_entries, None);
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_rejects_zero_shards() {
        let config = Config {
            shard_count: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_bad_compaction_percentage() {
        for pct in [0.0, -0.5, 1.5, f64::NAN] {
            let config = Config {
                compaction_percentage: pct,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "{} should be rejected", pct);
        }
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let config = Config {
            max_entries: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
