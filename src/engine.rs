//! Engine wiring
//!
//! [`LogEngine`] owns every component built from a [`Config`]: the fallback
//! store, the batching queue, the ingest gate in front of it and the periodic
//! fallback retry driver.

use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::fallback::{FallbackError, FallbackRetryJob, FallbackStore, RetryLimits, RetryReport};
use crate::ingest::{IngestGate, IngestLimits};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::queue::{BatchJournal, BatchingQueue, QueueSettings};
use crate::storage::{ObjectStoreGateway, StorageError, StorageGateway};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fallback store error: {0}")]
    Fallback(#[from] FallbackError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct LogEngine {
    gate: IngestGate,
    queue: Arc<BatchingQueue>,
    store: Arc<FallbackStore>,
    retry_job: Arc<FallbackRetryJob>,
    gateway: Arc<dyn StorageGateway>,
    metrics: Arc<Metrics>,
    retry_shutdown: watch::Sender<bool>,
    retry_driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl LogEngine {
    /// Start an engine uploading through the backend named in `config.storage`.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let gateway = Arc::new(ObjectStoreGateway::from_config(&config.storage)?);
        Self::start(config, gateway)
    }

    /// Start an engine uploading through `gateway`. Must be called inside a
    /// tokio runtime.
    pub fn start(config: &Config, gateway: Arc<dyn StorageGateway>) -> Result<Self, EngineError> {
        Self::start_with_journal(config, gateway, None)
    }

    /// Like [`start`](Self::start), consulting `journal` before every batch upload.
    pub fn start_with_journal(
        config: &Config,
        gateway: Arc<dyn StorageGateway>,
        journal: Option<Arc<dyn BatchJournal>>,
    ) -> Result<Self, EngineError> {
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(FallbackStore::new(
            &config.fallback.path,
            config.fallback.file_prefix.clone(),
        )?);

        let queue = Arc::new(
            BatchingQueue::builder()
                .settings(QueueSettings::from(&config.queue))
                .gateway(gateway.clone())
                .maybe_journal(journal)
                .fallback(store.clone())
                .metrics(metrics.clone())
                .build(),
        );

        let gate = IngestGate::new(
            IngestLimits::from(&config.ingest),
            queue.clone(),
            store.clone(),
            metrics.clone(),
        );

        let retry_job = Arc::new(FallbackRetryJob::new(
            store.root(),
            gateway.clone(),
            RetryLimits::from(&config.fallback),
            metrics.clone(),
        ));

        let (retry_shutdown, shutdown_rx) = watch::channel(false);
        let period = Duration::from_secs(config.fallback.retry_interval_secs.max(1));
        let retry_driver = retry_job.clone().spawn_periodic(period, shutdown_rx);

        info!(
            fallback_root = %store.root().display(),
            bucket = gateway.bucket_name(),
            protocol = ?gateway.protocol_type(),
            retry_interval_secs = period.as_secs(),
            "Log engine started"
        );

        Ok(Self {
            gate,
            queue,
            store,
            retry_job,
            gateway,
            metrics,
            retry_shutdown,
            retry_driver: Mutex::new(Some(retry_driver)),
            closed: AtomicBool::new(false),
        })
    }

    /// Hand a payload to the engine. Never fails and never waits on the network.
    pub fn put(&self, payload: impl Into<Bytes>) {
        if self.closed.load(Ordering::Acquire) {
            self.metrics.payload_rejected();
            debug!("Log engine closed, payload dropped");
            return;
        }
        self.gate.put(payload);
    }

    pub fn gate(&self) -> &IngestGate {
        &self.gate
    }

    pub fn fallback_root(&self) -> &Path {
        self.store.root()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one fallback retry round now, outside the periodic schedule.
    pub async fn run_retry_round(&self) -> RetryReport {
        self.retry_job.run().await
    }

    /// Stop the retry driver, flush the queue and close the gateway.
    ///
    /// Later calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.retry_shutdown.send_replace(true);
        let driver = self
            .retry_driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!(error = %e, "Fallback retry driver terminated abnormally");
            }
        }

        self.queue.close().await;
        self.gateway.close();

        info!(metrics = ?self.metrics.snapshot(), "Log engine closed");
    }
}
