use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ProtocolType, Result, StorageError, StorageGateway};

/// Gateway that keeps every upload in memory and can be told to fail
#[derive(Default)]
pub(crate) struct RecordingGateway {
    uploads: Mutex<Vec<(String, Bytes)>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let gateway = Self::default();
        gateway.set_failing(true);
        gateway
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn uploads(&self) -> Vec<(String, Bytes)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageGateway for RecordingGateway {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected failure")));
        }
        self.uploads.lock().unwrap().push((key.to_string(), data));
        Ok(())
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Memory
    }

    fn bucket_name(&self) -> &str {
        "test-bucket"
    }

    fn key_prefix(&self) -> &str {
        "test-prefix"
    }
}
