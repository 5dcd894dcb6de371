use super::models::{Config, OversizePayloadPolicy, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Fallback path must not be empty")]
    EmptyFallbackPath,

    #[error("Storage bucket must not be empty")]
    EmptyBucket,

    #[error("Storage provider is local but no root directory is configured")]
    LocalStorageMissingRoot,

    #[error("Retry interval must be positive")]
    ZeroRetryInterval,

    #[error(
        "oversize_fallback_max_bytes ({fallback_max}) must exceed payload_max_bytes ({payload_max}) under the fallback_file policy"
    )]
    OversizeFallbackBelowPayloadMax { payload_max: u64, fallback_max: u64 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_ingest(config)?;
    validate_fallback(config)?;
    validate_storage(config)?;
    Ok(())
}

/// A fallback ceiling at or below the payload ceiling would make the policy unreachable
fn validate_ingest(config: &Config) -> Result<(), ValidationError> {
    let ingest = &config.ingest;
    if ingest.oversize_payload_policy == OversizePayloadPolicy::FallbackFile
        && ingest.oversize_fallback_max_bytes.as_u64() <= ingest.payload_max_bytes.as_u64()
    {
        return Err(ValidationError::OversizeFallbackBelowPayloadMax {
            payload_max: ingest.payload_max_bytes.as_u64(),
            fallback_max: ingest.oversize_fallback_max_bytes.as_u64(),
        });
    }

    Ok(())
}

fn validate_fallback(config: &Config) -> Result<(), ValidationError> {
    if config.fallback.path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyFallbackPath);
    }

    if config.fallback.retry_interval_secs == 0 {
        return Err(ValidationError::ZeroRetryInterval);
    }

    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.bucket.trim().is_empty() {
        return Err(ValidationError::EmptyBucket);
    }

    if config.storage.provider == StorageProvider::Local && config.storage.root.is_none() {
        return Err(ValidationError::LocalStorageMissingRoot);
    }

    Ok(())
}
