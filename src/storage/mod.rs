//! Object storage boundary
//!
//! [`StorageGateway`] is the only capability a backend has to provide: upload a
//! byte payload at a key. The stream and buffer upload forms are free functions
//! layered on top of that primitive, so every backend gets them for free.

mod backend;
#[cfg(test)]
pub(crate) mod test_support;

pub use backend::ObjectStoreGateway;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid declared stream length: {0}")]
    InvalidLength(i64),

    #[error("Stream ended after {received} of {expected} declared bytes")]
    LengthMismatch { expected: usize, received: usize },

    #[error("Storage gateway is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Wire protocol spoken by a storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    S3,
    SfOss,
    Filesystem,
    Memory,
}

/// Destination for uploaded objects.
///
/// Implementors supply [`put_object`](StorageGateway::put_object) and the
/// identity accessors; [`put_stream`] and [`put_buffer`] work with any of them.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Upload `data` at `key`. The returned future completes when the backend
    /// has acknowledged the write.
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()>;

    fn protocol_type(&self) -> ProtocolType;

    fn bucket_name(&self) -> &str;

    fn key_prefix(&self) -> &str;

    fn supports_protocol(&self, protocol: ProtocolType) -> bool {
        self.protocol_type() == protocol
    }

    /// Release backend resources. Calling it again is a no-op.
    fn close(&self) {}
}

const STREAM_INITIAL_CAPACITY: usize = 64 * 1024;

/// Upload exactly `declared_len` bytes read from `reader`.
///
/// Negative or unrepresentable lengths are rejected before anything is read.
/// A stream that ends early fails with [`StorageError::LengthMismatch`].
pub async fn put_stream<G, R>(
    gateway: &G,
    key: &str,
    mut reader: R,
    declared_len: i64,
) -> Result<()>
where
    G: StorageGateway + ?Sized,
    R: AsyncRead + Unpin,
{
    let expected = checked_length(declared_len)?;
    // the declared length is untrusted, grow the buffer as bytes arrive
    let mut payload = Vec::with_capacity(expected.min(STREAM_INITIAL_CAPACITY));
    (&mut reader)
        .take(expected as u64)
        .read_to_end(&mut payload)
        .await?;

    if payload.len() < expected {
        return Err(StorageError::LengthMismatch {
            expected,
            received: payload.len(),
        });
    }

    gateway.put_object(key, Bytes::from(payload)).await
}

/// Upload the remaining bytes of `buffer`.
///
/// `Bytes` buffers are handed over without copying, which is what lets the
/// sharded batch upload slice one body into many uploads.
pub async fn put_buffer<G, B>(gateway: &G, key: &str, mut buffer: B) -> Result<()>
where
    G: StorageGateway + ?Sized,
    B: Buf,
{
    let payload = buffer.copy_to_bytes(buffer.remaining());
    gateway.put_object(key, payload).await
}

fn checked_length(declared_len: i64) -> Result<usize> {
    usize::try_from(declared_len)
        .ok()
        .filter(|len| *len <= isize::MAX as usize)
        .ok_or(StorageError::InvalidLength(declared_len))
}
