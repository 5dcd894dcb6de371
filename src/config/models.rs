use crate::humanize::ByteSize;
use crate::storage::ProtocolType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// What to do with a payload larger than `payload_max_bytes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePayloadPolicy {
    #[serde(alias = "DROP")]
    Drop,
    #[default]
    #[serde(alias = "FALLBACK_FILE")]
    FallbackFile,
}

/// Entry-point limits applied to every producer payload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Inclusive ceiling for payloads that go straight to the batching queue
    #[serde(default = "default_payload_max_bytes")]
    pub payload_max_bytes: ByteSize,
    #[serde(default)]
    pub oversize_payload_policy: OversizePayloadPolicy,
    /// Inclusive ceiling for oversize payloads written to a fallback file
    #[serde(default = "default_oversize_fallback_max_bytes")]
    pub oversize_fallback_max_bytes: ByteSize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            payload_max_bytes: default_payload_max_bytes(),
            oversize_payload_policy: OversizePayloadPolicy::default(),
            oversize_fallback_max_bytes: default_oversize_fallback_max_bytes(),
        }
    }
}

fn default_payload_max_bytes() -> ByteSize {
    ByteSize::mib(1)
}

fn default_oversize_fallback_max_bytes() -> ByteSize {
    ByteSize::mib(10)
}

/// Batching queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_batch_max_messages")]
    pub batch_max_messages: usize,
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: ByteSize,
    #[serde(default = "default_max_message_age_ms")]
    pub max_message_age_ms: u64,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
    #[serde(default = "default_true")]
    pub enable_sharding: bool,
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
    #[serde(default = "default_max_concurrent_shard_uploads")]
    pub max_concurrent_shard_uploads: usize,
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            batch_max_messages: default_batch_max_messages(),
            batch_max_bytes: default_batch_max_bytes(),
            max_message_age_ms: default_max_message_age_ms(),
            enable_compression: true,
            enable_sharding: true,
            max_upload_size_mb: default_max_upload_size_mb(),
            max_concurrent_shard_uploads: default_max_concurrent_shard_uploads(),
            upload_timeout_ms: default_upload_timeout_ms(),
        }
    }
}

fn default_capacity() -> usize {
    65_536
}

fn default_batch_max_messages() -> usize {
    4096
}

fn default_batch_max_bytes() -> ByteSize {
    ByteSize::mib(10)
}

fn default_max_message_age_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_upload_size_mb() -> u64 {
    10
}

fn default_max_concurrent_shard_uploads() -> usize {
    4
}

fn default_upload_timeout_ms() -> u64 {
    30_000
}

/// Fallback directory and retry-round configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_path")]
    pub path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_retry_file_bytes")]
    pub max_retry_file_bytes: ByteSize,
    #[serde(default = "default_max_retry_files_per_round")]
    pub max_retry_files_per_round: usize,
    #[serde(default = "default_max_retry_bytes_per_round")]
    pub max_retry_bytes_per_round: ByteSize,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            path: default_fallback_path(),
            retention_days: default_retention_days(),
            max_retry_file_bytes: default_max_retry_file_bytes(),
            max_retry_files_per_round: default_max_retry_files_per_round(),
            max_retry_bytes_per_round: default_max_retry_bytes_per_round(),
            retry_interval_secs: default_retry_interval_secs(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_fallback_path() -> PathBuf {
    PathBuf::from("data/fallback")
}

fn default_retention_days() -> u32 {
    7
}

fn default_max_retry_file_bytes() -> ByteSize {
    ByteSize::mib(10)
}

fn default_max_retry_files_per_round() -> usize {
    100
}

fn default_max_retry_bytes_per_round() -> ByteSize {
    ByteSize::mib(50)
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_file_prefix() -> String {
    "logvault".to_string()
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Memory,
    Local,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolType,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub key_prefix: String,
    /// Root directory for the local provider
    pub root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            protocol: default_protocol(),
            bucket: default_bucket(),
            key_prefix: String::new(),
            root: None,
        }
    }
}

fn default_protocol() -> ProtocolType {
    ProtocolType::S3
}

fn default_bucket() -> String {
    "logvault-default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.ingest.payload_max_bytes.as_u64(), 1024 * 1024);
        assert_eq!(
            config.ingest.oversize_payload_policy,
            OversizePayloadPolicy::FallbackFile
        );
        assert_eq!(config.queue.upload_timeout_ms, 30_000);
        assert!(config.queue.enable_sharding);
        assert_eq!(config.fallback.max_retry_files_per_round, 100);
        assert_eq!(
            config.fallback.max_retry_bytes_per_round.as_u64(),
            50 * 1024 * 1024
        );
        assert_eq!(config.storage.provider, StorageProvider::Memory);
    }

    #[test]
    fn test_policy_accepts_upper_case_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: OversizePayloadPolicy,
        }

        let parsed: Wrapper = toml::from_str("policy = \"DROP\"").unwrap();
        assert_eq!(parsed.policy, OversizePayloadPolicy::Drop);
        let parsed: Wrapper = toml::from_str("policy = \"fallback_file\"").unwrap();
        assert_eq!(parsed.policy, OversizePayloadPolicy::FallbackFile);
    }
}
