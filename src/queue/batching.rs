use bon::bon;
use bytes::Bytes;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, error, info, warn};

use super::batch::{Batch, FlushReason, SealedBatch};
use super::shard::ShardUploader;
use super::BatchJournal;
use crate::config::QueueConfig;
use crate::fallback::FallbackSink;
use crate::observability::Metrics;
use crate::storage::StorageGateway;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Runtime queue limits. Zero limits from config are raised to 1.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub batch_max_messages: usize,
    pub batch_max_bytes: usize,
    pub max_message_age: Duration,
    pub enable_compression: bool,
    pub enable_sharding: bool,
    /// Bodies larger than this are split into shards of this size
    pub max_upload_size_bytes: usize,
    pub max_concurrent_shard_uploads: usize,
    pub upload_timeout: Duration,
    /// Delay before a batch refused by the journal is offered again
    pub journal_retry_backoff: Duration,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            batch_max_messages: config.batch_max_messages.max(1),
            batch_max_bytes: config.batch_max_bytes.as_usize().max(1),
            max_message_age: Duration::from_millis(config.max_message_age_ms.max(1)),
            enable_compression: config.enable_compression,
            enable_sharding: config.enable_sharding,
            max_upload_size_bytes: usize::try_from(config.max_upload_size_mb.max(1))
                .unwrap_or(usize::MAX)
                .saturating_mul(BYTES_PER_MB),
            max_concurrent_shard_uploads: config.max_concurrent_shard_uploads.max(1),
            upload_timeout: Duration::from_millis(config.upload_timeout_ms.max(1)),
            journal_retry_backoff: Duration::from_millis(100),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// Multi-producer queue with a single batching consumer task
pub struct BatchingQueue {
    tx: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

#[bon]
impl BatchingQueue {
    /// Create the queue and spawn its consumer on the current runtime.
    #[builder]
    pub fn new(
        settings: QueueSettings,
        gateway: Arc<dyn StorageGateway>,
        journal: Option<Arc<dyn BatchJournal>>,
        // receives the uncompressed form of batches that could not be uploaded
        fallback: Option<Arc<dyn FallbackSink>>,
        #[builder(default)] metrics: Arc<Metrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            capacity = settings.capacity,
            batch_max_messages = settings.batch_max_messages,
            batch_max_bytes = settings.batch_max_bytes,
            compression = settings.enable_compression,
            sharding = settings.enable_sharding,
            "Starting batching queue"
        );

        let consumer = Consumer {
            rx,
            shutdown: shutdown_rx,
            uploader: ShardUploader::new(
                gateway,
                settings.max_concurrent_shard_uploads,
                settings.upload_timeout,
            ),
            settings,
            journal,
            fallback,
            metrics: metrics.clone(),
            batch: Batch::new(),
            pending: VecDeque::new(),
            retry_at: None,
            closing: false,
        };
        let handle = tokio::spawn(consumer.run());

        Self {
            tx,
            shutdown,
            consumer: Mutex::new(Some(handle)),
            metrics,
        }
    }
}

impl BatchingQueue {
    /// Enqueue without waiting. `false` means the queue is full or closed.
    pub fn submit(&self, payload: Bytes) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => {
                self.metrics.payload_enqueued();
                true
            }
            Err(TrySendError::Full(payload)) => {
                self.metrics.payload_rejected();
                debug!(size = payload.len(), "Batching queue full");
                false
            }
            Err(TrySendError::Closed(payload)) => {
                self.metrics.payload_rejected();
                debug!(size = payload.len(), "Batching queue closed");
                false
            }
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop accepting payloads, flush what is queued and wait for the consumer.
    ///
    /// Later calls return immediately.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Batching consumer terminated abnormally");
            }
            info!("Batching queue closed");
        }
    }
}

struct Consumer {
    rx: mpsc::Receiver<Bytes>,
    shutdown: watch::Receiver<bool>,
    settings: QueueSettings,
    uploader: ShardUploader,
    journal: Option<Arc<dyn BatchJournal>>,
    fallback: Option<Arc<dyn FallbackSink>>,
    metrics: Arc<Metrics>,
    batch: Batch,
    /// Sealed batches the journal refused, oldest first
    pending: VecDeque<SealedBatch>,
    retry_at: Option<Instant>,
    closing: bool,
}

impl Consumer {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            // no new payloads while refused batches wait, so the channel fills up
            let accepting = self.pending.is_empty();

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep_until_deadline(deadline) => self.on_deadline().await,
                received = self.rx.recv(), if accepting => match received {
                    Some(payload) => self.accept(payload).await,
                    None => break,
                },
            }
        }

        self.drain().await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        if !self.pending.is_empty() {
            return self.retry_at;
        }
        self.batch.deadline(self.settings.max_message_age)
    }

    async fn on_deadline(&mut self) {
        if !self.pending.is_empty() {
            self.retry_pending().await;
            return;
        }

        if let Some(reason) = self.flush_reason() {
            self.flush(reason).await;
        }
    }

    fn flush_reason(&self) -> Option<FlushReason> {
        self.batch.flush_reason(
            self.settings.batch_max_messages,
            self.settings.batch_max_bytes,
            self.settings.max_message_age,
            Instant::now(),
        )
    }

    async fn accept(&mut self, payload: Bytes) {
        if self
            .batch
            .would_overflow(payload.len(), self.settings.batch_max_bytes)
        {
            self.flush(FlushReason::Size).await;
        }

        self.batch.push(payload);

        if let Some(reason) = self.flush_reason() {
            self.flush(reason).await;
        }
    }

    async fn flush(&mut self, reason: FlushReason) {
        let batch = self.batch.take();
        if batch.is_empty() {
            return;
        }

        let messages = batch.len();
        let bytes = batch.total_bytes();
        debug!(reason = reason.as_str(), messages, bytes, "Flushing batch");

        let sealed = match batch.seal(self.settings.enable_compression) {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(error = %e, messages, "Failed to seal batch, batch lost");
                self.metrics.batch_failed();
                return;
            }
        };

        if !self.pending.is_empty() && !self.closing {
            self.defer(sealed);
            return;
        }

        if let Some(refused) = self.deliver(sealed).await {
            self.defer(refused);
        }
    }

    fn defer(&mut self, sealed: SealedBatch) {
        self.metrics.batch_deferred();
        warn!(
            messages = sealed.message_count,
            size = sealed.body.len(),
            backoff_ms = self.settings.journal_retry_backoff.as_millis() as u64,
            "Batch journal refused batch, deferring"
        );
        self.pending.push_back(sealed);
        self.retry_at = Some(Instant::now() + self.settings.journal_retry_backoff);
    }

    async fn retry_pending(&mut self) {
        while let Some(sealed) = self.pending.pop_front() {
            if let Some(refused) = self.deliver(sealed).await {
                self.pending.push_front(refused);
                self.metrics.batch_deferred();
                self.retry_at = Some(Instant::now() + self.settings.journal_retry_backoff);
                return;
            }
        }
        self.retry_at = None;
    }

    /// Journal and upload one batch. Hands the batch back if the journal refused it
    /// and the queue is still running.
    async fn deliver(&mut self, sealed: SealedBatch) -> Option<SealedBatch> {
        if let Some(journal) = &self.journal {
            let accepted = journal.record(
                &sealed.body,
                sealed.original_size,
                sealed.compressed,
                sealed.message_count,
            );
            if !accepted {
                if !self.closing {
                    return Some(sealed);
                }
                warn!(
                    messages = sealed.message_count,
                    "Batch journal refused batch during shutdown, diverting to fallback"
                );
                self.divert(sealed).await;
                return None;
            }
        }

        self.upload(sealed).await;
        None
    }

    async fn upload(&mut self, sealed: SealedBatch) {
        let key = sealed.object_key(Utc::now());
        let size = sealed.body.len();
        let shard_size = self.settings.max_upload_size_bytes;

        let result = if self.settings.enable_sharding && size > shard_size {
            self.uploader
                .upload_sharded(&key, sealed.body.clone(), shard_size)
                .await
        } else {
            self.uploader
                .upload_whole(&key, sealed.body.clone())
                .await
                .map(|()| 1)
        };

        match result {
            Ok(shards) => {
                self.metrics.batch_uploaded(shards);
                info!(
                    key = %key,
                    size,
                    original_size = sealed.original_size,
                    messages = sealed.message_count,
                    shards,
                    "Batch uploaded"
                );
            }
            Err(e) => {
                self.metrics.batch_failed();
                error!(
                    key = %key,
                    error = %e,
                    messages = sealed.message_count,
                    "Batch upload failed, diverting to fallback"
                );
                self.divert(sealed).await;
            }
        }
    }

    async fn divert(&self, sealed: SealedBatch) {
        let Some(sink) = self.fallback.clone() else {
            error!(
                messages = sealed.message_count,
                size = sealed.original_size,
                "No fallback sink configured, batch lost"
            );
            return;
        };

        let raw = sealed.raw;
        match tokio::task::spawn_blocking(move || sink.write_fallback_file(&raw)).await {
            Ok(Ok(path)) => {
                self.metrics.fallback_file_written();
                info!(path = %path.display(), messages = sealed.message_count, "Batch written to fallback file");
            }
            Ok(Err(e)) => {
                self.metrics.fallback_write_failed();
                error!(error = %e, messages = sealed.message_count, "Fallback write failed, batch lost");
            }
            Err(e) => {
                self.metrics.fallback_write_failed();
                error!(error = %e, messages = sealed.message_count, "Fallback write task failed, batch lost");
            }
        }
    }

    async fn drain(mut self) {
        self.closing = true;

        let refused = std::mem::take(&mut self.pending);
        for sealed in refused {
            self.deliver(sealed).await;
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(payload) = self.rx.recv().await {
            drained += 1;
            self.accept(payload).await;
        }

        self.flush(FlushReason::Shutdown).await;
        debug!(drained, "Batching consumer drained");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
