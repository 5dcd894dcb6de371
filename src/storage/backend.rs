use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, PutPayload, path::Path as StoragePath};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ProtocolType, Result, StorageError, StorageGateway};
use crate::config::{StorageConfig, StorageProvider};

/// Gateway over any `object_store` backend
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
    protocol: ProtocolType,
    bucket: String,
    key_prefix: String,
    closed: AtomicBool,
}

impl ObjectStoreGateway {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        protocol: ProtocolType,
        bucket: impl Into<String>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            protocol,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// In-memory backend for testing/development
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemory::new()),
            ProtocolType::Memory,
            "logvault-local",
            "",
        )
    }

    /// Build the backend named by the `[storage]` config section.
    ///
    /// The local provider stores objects under `<root>/<bucket>`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.provider {
            StorageProvider::Memory => Arc::new(InMemory::new()),
            StorageProvider::Local => {
                let root = config
                    .root
                    .as_ref()
                    .ok_or_else(|| {
                        StorageError::Io(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "local storage provider requires a root directory",
                        ))
                    })?
                    .join(&config.bucket);
                std::fs::create_dir_all(&root)?;
                Arc::new(LocalFileSystem::new_with_prefix(&root)?)
            }
        };

        tracing::info!(
            provider = ?config.provider,
            bucket = %config.bucket,
            key_prefix = %config.key_prefix,
            "Storage gateway ready"
        );

        Ok(Self::new(
            store,
            config.protocol,
            config.bucket.clone(),
            config.key_prefix.clone(),
        ))
    }

    fn object_path(&self, key: &str) -> StoragePath {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            StoragePath::from(key)
        } else {
            StoragePath::from(format!("{}/{}", prefix, key.trim_start_matches('/')))
        }
    }

    /// Fetch an object previously uploaded at `key` (prefix applied).
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key);
        let bytes = self.store.get(&path).await?.bytes().await?;
        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");
        Ok(bytes)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StorageGateway for ObjectStoreGateway {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let path = self.object_path(key);
        let size = data.len();
        let put_result = self.store.put(&path, PutPayload::from(data)).await?;

        tracing::debug!(key, size, etag = ?put_result.e_tag, "Uploaded to storage");
        Ok(())
    }

    fn protocol_type(&self) -> ProtocolType {
        self.protocol
    }

    fn bucket_name(&self) -> &str {
        &self.bucket
    }

    fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(bucket = %self.bucket, "Storage gateway closed");
        }
    }
}
