//! Bounded batching queue
//!
//! Producers hand payloads to [`BatchingQueue::submit`], which never blocks. A
//! single consumer task folds them into batches, seals each batch (newline
//! delimited, optionally gzip) and uploads it, sharding bodies that exceed the
//! upload size limit.

pub mod batch;
pub mod batching;
pub mod shard;

pub use batch::{Batch, FlushReason, SealedBatch};
pub use batching::{BatchingQueue, QueueSettings};
pub use shard::ShardUploader;

use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload of {key} failed: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Upload of {key} timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    #[error("Upload task aborted: {0}")]
    Aborted(String),
}

/// External journal consulted with every sealed batch before it is uploaded.
///
/// Arguments are the upload body, the uncompressed size, whether the body is
/// compressed and the message count. Returning `false` holds the batch back;
/// the queue offers it again after a short backoff.
pub trait BatchJournal: Send + Sync {
    fn record(&self, data: &[u8], original_size: usize, compressed: bool, message_count: usize)
    -> bool;
}

impl<F> BatchJournal for F
where
    F: Fn(&[u8], usize, bool, usize) -> bool + Send + Sync,
{
    fn record(
        &self,
        data: &[u8],
        original_size: usize,
        compressed: bool,
        message_count: usize,
    ) -> bool {
        self(data, original_size, compressed, message_count)
    }
}
