//! Global configuration types for Trainloop.
//!
//! `FabricConfig` represents the top-level `trainloop.toml` that controls
//! the cache, retry backoff, quota period, and model pricing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Trainloop fabric.
///
/// Loaded from `trainloop.toml` in the data directory. All fields have
/// sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Path to the SQLite database file (None = `<data_dir>/trainloop.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Retry backoff settings.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Quota counter rollover period in days.
    #[serde(default = "default_quota_period_days")]
    pub quota_period_days: u32,

    /// Pricing information for cost estimation per model pattern.
    #[serde(default)]
    pub pricing: Vec<ModelPricing>,
}

fn default_quota_period_days() -> u32 {
    30
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            quota_period_days: default_quota_period_days(),
            pricing: Vec::new(),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Capacity of the in-process LRU tier.
    #[serde(default = "default_tier1_capacity")]
    pub tier1_capacity: usize,

    /// TTL overrides in seconds, keyed by cache type name
    /// (e.g. `plan = 259200`).
    #[serde(default)]
    pub ttl_overrides: HashMap<String, u64>,
}

fn default_tier1_capacity() -> usize {
    512
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            tier1_capacity: default_tier1_capacity(),
            ttl_overrides: HashMap::new(),
        }
    }
}

/// Exponential backoff settings for run retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,
}

fn default_base_ms() -> u64 {
    500
}

fn default_ceiling_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            ceiling_ms: default_ceiling_ms(),
        }
    }
}

/// Cost information for a model pattern.
///
/// Used to estimate spend per generation and the spend avoided by cache hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Prefix pattern for matching model names (e.g. "coach-large").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fabric_config_default_values() {
        let config = FabricConfig::default();
        assert_eq!(config.cache.tier1_capacity, 512);
        assert_eq!(config.retry.base_ms, 500);
        assert_eq!(config.retry.ceiling_ms, 30_000);
        assert_eq!(config.quota_period_days, 30);
        assert!(config.pricing.is_empty());
    }

    #[test]
    fn test_fabric_config_deserialize_empty() {
        let config: FabricConfig = toml::from_str("").unwrap();
        assert_eq!(config.cache.tier1_capacity, 512);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_fabric_config_deserialize_with_values() {
        let toml_str = r#"
database_path = "/var/lib/trainloop/fabric.db"
quota_period_days = 7

[cache]
tier1_capacity = 128

[cache.ttl_overrides]
plan = 259200

[retry]
base_ms = 250
ceiling_ms = 10000

[[pricing]]
model_pattern = "coach-large"
input_cost_per_million = 3.0
output_cost_per_million = 15.0
"#;
        let config: FabricConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_path.as_deref(), Some("/var/lib/trainloop/fabric.db"));
        assert_eq!(config.cache.tier1_capacity, 128);
        assert_eq!(config.cache.ttl_overrides.get("plan"), Some(&259_200));
        assert_eq!(config.retry.base_ms, 250);
        assert_eq!(config.quota_period_days, 7);
        assert_eq!(config.pricing.len(), 1);
        assert!((config.pricing[0].input_cost_per_million - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fabric_config_serde_roundtrip() {
        let config = FabricConfig {
            database_path: Some("/tmp/t.db".to_string()),
            pricing: vec![ModelPricing {
                model_pattern: "coach-*".to_string(),
                input_cost_per_million: 2.5,
                output_cost_per_million: 10.0,
            }],
            ..FabricConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FabricConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.database_path.as_deref(), Some("/tmp/t.db"));
        assert_eq!(parsed.pricing.len(), 1);
    }
}
