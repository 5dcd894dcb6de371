use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};

use super::UploadError;
use super::batch::shard_key;
use crate::storage::{StorageGateway, put_buffer};

/// Contiguous byte ranges of at most `shard_size` covering `0..len`.
pub fn shard_ranges(len: usize, shard_size: usize) -> Vec<Range<usize>> {
    let shard_size = shard_size.max(1);
    (0..len)
        .step_by(shard_size)
        .map(|start| start..(start + shard_size).min(len))
        .collect()
}

/// Uploads batch bodies, splitting large ones into concurrently uploaded shards.
///
/// Every shard must hold a permit while it is in flight, so at most
/// `max_concurrent` uploads run at once no matter how many shards a batch has.
pub struct ShardUploader {
    gateway: Arc<dyn StorageGateway>,
    permits: Arc<Semaphore>,
    upload_timeout: Duration,
}

impl ShardUploader {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        max_concurrent: usize,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            upload_timeout,
        }
    }

    /// Upload `body` as one object under `key`.
    pub async fn upload_whole(&self, key: &str, body: Bytes) -> Result<(), UploadError> {
        match timeout(self.upload_timeout, self.gateway.put_object(key, body)).await {
            Ok(result) => result.map_err(|source| UploadError::Storage {
                key: key.to_string(),
                source,
            }),
            Err(_) => Err(UploadError::Timeout {
                key: key.to_string(),
                timeout: self.upload_timeout,
            }),
        }
    }

    /// Upload `body` as `<key>.shard-NNNNN` slices of `shard_size` bytes.
    ///
    /// Returns the shard count. The first failing shard fails the whole call and
    /// aborts the shards still running.
    pub async fn upload_sharded(
        &self,
        key: &str,
        body: Bytes,
        shard_size: usize,
    ) -> Result<usize, UploadError> {
        let ranges = shard_ranges(body.len(), shard_size);
        let shard_count = ranges.len();
        let mut tasks = JoinSet::new();

        tracing::debug!(key, shard_count, size = body.len(), "Uploading sharded batch");

        for (index, range) in ranges.into_iter().enumerate() {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| UploadError::Aborted("shard permits closed".to_string()))?;

            // stop admitting shards once one has failed
            while let Some(joined) = tasks.try_join_next() {
                flatten(joined)?;
            }

            let shard = body.slice(range);
            let shard_key = shard_key(key, index);
            let gateway = self.gateway.clone();
            let upload_timeout = self.upload_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                match timeout(
                    upload_timeout,
                    put_buffer(gateway.as_ref(), &shard_key, shard),
                )
                .await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(source)) => Err(UploadError::Storage {
                        key: shard_key,
                        source,
                    }),
                    Err(_) => Err(UploadError::Timeout {
                        key: shard_key,
                        timeout: upload_timeout,
                    }),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            flatten(joined)?;
        }

        Ok(shard_count)
    }
}

fn flatten(
    joined: Result<Result<(), UploadError>, tokio::task::JoinError>,
) -> Result<(), UploadError> {
    joined.map_err(|e| UploadError::Aborted(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::RecordingGateway;

    #[test]
    fn test_shard_ranges_cover_body() {
        assert_eq!(shard_ranges(10, 4), vec![0..4, 4..8, 8..10]);
        assert_eq!(shard_ranges(8, 4), vec![0..4, 4..8]);
        assert_eq!(shard_ranges(3, 10), vec![0..3]);
        assert!(shard_ranges(0, 4).is_empty());
    }

    #[tokio::test]
    async fn test_shards_are_views_of_one_body() {
        let gateway = Arc::new(RecordingGateway::new());
        let uploader = ShardUploader::new(gateway.clone(), 2, Duration::from_secs(5));
        let body = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());

        let shards = uploader
            .upload_sharded("batch.log", body.clone(), 300)
            .await
            .unwrap();
        assert_eq!(shards, 4);

        let mut uploads = gateway.uploads();
        uploads.sort_by(|a, b| a.0.cmp(&b.0));
        let keys: Vec<_> = uploads.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "batch.log.shard-00000",
                "batch.log.shard-00001",
                "batch.log.shard-00002",
                "batch.log.shard-00003"
            ]
        );

        for (index, (_, data)) in uploads.iter().enumerate() {
            // same allocation, offset by the shard size
            assert_eq!(data.as_ptr(), body[index * 300..].as_ptr());
        }
        let joined: Vec<u8> = uploads.iter().flat_map(|(_, d)| d.to_vec()).collect();
        assert_eq!(joined, body.to_vec());
    }

    #[tokio::test]
    async fn test_failing_shard_fails_batch() {
        let gateway = Arc::new(RecordingGateway::failing());
        let uploader = ShardUploader::new(gateway, 2, Duration::from_secs(5));

        let err = uploader
            .upload_sharded("batch.log", Bytes::from(vec![1u8; 64]), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_upload_whole_reports_storage_failure() {
        let gateway = Arc::new(RecordingGateway::failing());
        let uploader = ShardUploader::new(gateway, 1, Duration::from_secs(5));

        let err = uploader
            .upload_whole("batch.log", Bytes::from_static(b"x\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage { key, .. } if key == "batch.log"));
    }
}
