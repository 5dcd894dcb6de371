#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use logvault::storage::{ProtocolType, Result, StorageError, StorageGateway};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Gateway that records uploads, tracks how many run at once and can be
/// slowed down or told to fail.
#[derive(Default)]
pub struct InstrumentedGateway {
    uploads: Mutex<Vec<(String, Bytes)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
    closes: AtomicUsize,
}

impl InstrumentedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<(String, Bytes)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub async fn wait_for_uploads(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.uploads.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("uploads did not arrive in time");
    }
}

#[async_trait]
impl StorageGateway for InstrumentedGateway {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Io(std::io::Error::other("injected failure")))
        } else {
            self.uploads.lock().unwrap().push((key.to_string(), data));
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Memory
    }

    fn bucket_name(&self) -> &str {
        "it-bucket"
    }

    fn key_prefix(&self) -> &str {
        ""
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
