use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "LOGVAULT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/logvault.toml";
const ENV_PREFIX: &str = "LOGVAULT";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env is not an error
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and the environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // LOGVAULT__QUEUE__CAPACITY -> queue.capacity
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OversizePayloadPolicy, StorageProvider};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.queue.capacity, 65_536);
        assert_eq!(config.fallback.retention_days, 7);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[ingest]
payload_max_bytes = "4KB"
oversize_payload_policy = "drop"

[queue]
capacity = 128
batch_max_bytes = 1048576
enable_compression = false

[fallback]
path = "/var/spool/logvault"
max_retry_bytes_per_round = "20MB"

[storage]
provider = "local"
protocol = "sf_oss"
bucket = "app-logs"
root = "/srv/objects"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.ingest.payload_max_bytes.as_u64(), 4096);
        assert_eq!(
            config.ingest.oversize_payload_policy,
            OversizePayloadPolicy::Drop
        );
        assert_eq!(config.queue.capacity, 128);
        assert_eq!(config.queue.batch_max_bytes.as_u64(), 1024 * 1024);
        assert!(!config.queue.enable_compression);
        // untouched keys keep their defaults
        assert!(config.queue.enable_sharding);
        assert_eq!(
            config.fallback.path,
            PathBuf::from("/var/spool/logvault")
        );
        assert_eq!(
            config.fallback.max_retry_bytes_per_round.as_u64(),
            20 * 1024 * 1024
        );
        assert_eq!(config.storage.provider, StorageProvider::Local);
        assert_eq!(config.storage.bucket, "app-logs");
    }

    // Environment overrides are not exercised here: std::env::set_var is
    // unsafe in edition 2024 and would leak across parallel tests.
}
