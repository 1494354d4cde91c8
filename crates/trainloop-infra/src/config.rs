//! Configuration loader for Trainloop.
//!
//! Reads `trainloop.toml` from the data directory and deserializes it into
//! [`FabricConfig`]. Falls back to defaults when the file is missing or
//! malformed; a bad config file must never keep the daemon from starting.

use std::path::Path;

use trainloop_types::config::FabricConfig;

/// Load configuration from `{data_dir}/trainloop.toml`.
///
/// - Missing file: returns [`FabricConfig::default()`].
/// - Unreadable or unparseable file: logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> FabricConfig {
    let config_path = data_dir.join("trainloop.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No trainloop.toml at {}, using defaults", config_path.display());
            return FabricConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return FabricConfig::default();
        }
    };

    match toml::from_str::<FabricConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            FabricConfig::default()
        }
    }
}

/// Resolve the database URL from config or the conventional location under
/// the data directory.
pub fn database_url(config: &FabricConfig, data_dir: &Path) -> String {
    match &config.database_path {
        Some(path) => format!("sqlite://{path}?mode=rwc"),
        None => format!("sqlite://{}/trainloop.db?mode=rwc", data_dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).await;
        assert_eq!(config.cache.tier1_capacity, 512);
        assert_eq!(config.quota_period_days, 30);
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("trainloop.toml"),
            r#"
quota_period_days = 7

[cache]
tier1_capacity = 64

[retry]
base_ms = 250

[[pricing]]
model_pattern = "gpt-4o"
input_cost_per_million = 2.0
output_cost_per_million = 8.0
"#,
        )
        .await
        .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.quota_period_days, 7);
        assert_eq!(config.cache.tier1_capacity, 64);
        assert_eq!(config.retry.base_ms, 250);
        assert_eq!(config.pricing.len(), 1);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("trainloop.toml"), "not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(tmp.path()).await;
        assert_eq!(config.cache.tier1_capacity, 512);
    }

    #[test]
    fn database_url_prefers_configured_path() {
        let config = FabricConfig {
            database_path: Some("/var/lib/trainloop/fabric.db".to_string()),
            ..FabricConfig::default()
        };
        let url = database_url(&config, Path::new("/tmp"));
        assert_eq!(url, "sqlite:///var/lib/trainloop/fabric.db?mode=rwc");
    }

    #[test]
    fn database_url_defaults_to_data_dir() {
        let url = database_url(&FabricConfig::default(), Path::new("/data"));
        assert_eq!(url, "sqlite:///data/trainloop.db?mode=rwc");
    }
}
