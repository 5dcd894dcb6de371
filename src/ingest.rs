//! Producer entry point
//!
//! [`IngestGate::put`] is the only call producers make. It never fails and never
//! waits on the network: payloads within the size limit go to the batching
//! queue, oversize payloads are dropped or written to a fallback file depending
//! on [`OversizePayloadPolicy`].

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::IngestConfig;
pub use crate::config::OversizePayloadPolicy;
use crate::fallback::FallbackSink;
use crate::observability::Metrics;
use crate::queue::BatchingQueue;

/// Non-blocking submission into a bounded queue
pub trait PayloadQueue: Send + Sync {
    /// `false` when the payload could not be enqueued
    fn submit(&self, payload: Bytes) -> bool;
}

impl PayloadQueue for BatchingQueue {
    fn submit(&self, payload: Bytes) -> bool {
        BatchingQueue::submit(self, payload)
    }
}

/// Size ceilings applied by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub payload_max_bytes: usize,
    pub policy: OversizePayloadPolicy,
    pub oversize_fallback_max_bytes: usize,
}

impl From<&IngestConfig> for IngestLimits {
    fn from(config: &IngestConfig) -> Self {
        Self {
            payload_max_bytes: config.payload_max_bytes.as_usize().max(1),
            policy: config.oversize_payload_policy,
            oversize_fallback_max_bytes: config.oversize_fallback_max_bytes.as_usize().max(1),
        }
    }
}

/// What happened to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Enqueued,
    /// Queue full or closed
    Rejected,
    DroppedOversize,
    Diverted,
    /// Fallback write failed
    Lost,
}

pub struct IngestGate {
    limits: IngestLimits,
    queue: Arc<dyn PayloadQueue>,
    fallback: Arc<dyn FallbackSink>,
    metrics: Arc<Metrics>,
}

impl IngestGate {
    pub fn new(
        limits: IngestLimits,
        queue: Arc<dyn PayloadQueue>,
        fallback: Arc<dyn FallbackSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            limits,
            queue,
            fallback,
            metrics,
        }
    }

    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    /// Route one payload. Outcomes are visible only through the queue, the
    /// fallback directory, metrics and logs.
    pub fn put(&self, payload: impl Into<Bytes>) {
        self.route(payload.into());
    }

    /// Same as [`put`](Self::put), reporting where the payload went.
    pub fn route(&self, payload: Bytes) -> Disposition {
        let size = payload.len();

        if size <= self.limits.payload_max_bytes {
            if self.queue.submit(payload) {
                return Disposition::Enqueued;
            }
            warn!(size, "Batching queue full, payload dropped");
            return Disposition::Rejected;
        }

        match self.limits.policy {
            OversizePayloadPolicy::Drop => {
                self.metrics.payload_dropped_oversize();
                warn!(
                    size,
                    limit = self.limits.payload_max_bytes,
                    "Oversize payload dropped"
                );
                Disposition::DroppedOversize
            }
            OversizePayloadPolicy::FallbackFile
                if size > self.limits.oversize_fallback_max_bytes =>
            {
                self.metrics.payload_dropped_oversize();
                warn!(
                    size,
                    limit = self.limits.oversize_fallback_max_bytes,
                    "Payload exceeds fallback file limit, dropped"
                );
                Disposition::DroppedOversize
            }
            OversizePayloadPolicy::FallbackFile => {
                match self.fallback.write_fallback_file(&payload) {
                    Ok(path) => {
                        self.metrics.payload_diverted();
                        debug!(size, path = %path.display(), "Oversize payload written to fallback file");
                        Disposition::Diverted
                    }
                    Err(e) => {
                        self.metrics.fallback_write_failed();
                        error!(size, error = %e, "Failed to write oversize payload to fallback file");
                        Disposition::Lost
                    }
                }
            }
        }
    }
}
