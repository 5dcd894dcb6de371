//! Engine counters
//!
//! Producer-facing operations never return errors, so these counters (plus the
//! log output) are the only way to see what happened to a payload.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    payloads_enqueued: AtomicU64,
    payloads_rejected: AtomicU64,
    payloads_dropped_oversize: AtomicU64,
    payloads_diverted: AtomicU64,
    batches_uploaded: AtomicU64,
    batches_failed: AtomicU64,
    batches_deferred: AtomicU64,
    shards_uploaded: AtomicU64,
    fallback_files_written: AtomicU64,
    fallback_write_failures: AtomicU64,
    retry_files_uploaded: AtomicU64,
    retry_files_quarantined: AtomicU64,
    retry_files_expired: AtomicU64,
    retry_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn incr(counter: &AtomicU64, name: &'static str, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
        tracing::debug!(counter = name, by, "Metric incremented");
    }

    pub fn payload_enqueued(&self) {
        Self::incr(&self.payloads_enqueued, "payloads_enqueued", 1);
    }

    /// Queue was full when the payload arrived.
    pub fn payload_rejected(&self) {
        Self::incr(&self.payloads_rejected, "payloads_rejected", 1);
    }

    pub fn payload_dropped_oversize(&self) {
        Self::incr(&self.payloads_dropped_oversize, "payloads_dropped_oversize", 1);
    }

    pub fn payload_diverted(&self) {
        Self::incr(&self.payloads_diverted, "payloads_diverted", 1);
    }

    pub fn batch_uploaded(&self, shards: usize) {
        Self::incr(&self.batches_uploaded, "batches_uploaded", 1);
        Self::incr(&self.shards_uploaded, "shards_uploaded", shards as u64);
    }

    pub fn batch_failed(&self) {
        Self::incr(&self.batches_failed, "batches_failed", 1);
    }

    pub fn batch_deferred(&self) {
        Self::incr(&self.batches_deferred, "batches_deferred", 1);
    }

    pub fn fallback_file_written(&self) {
        Self::incr(&self.fallback_files_written, "fallback_files_written", 1);
    }

    pub fn fallback_write_failed(&self) {
        Self::incr(&self.fallback_write_failures, "fallback_write_failures", 1);
    }

    pub fn retry_file_uploaded(&self) {
        Self::incr(&self.retry_files_uploaded, "retry_files_uploaded", 1);
    }

    pub fn retry_file_quarantined(&self) {
        Self::incr(&self.retry_files_quarantined, "retry_files_quarantined", 1);
    }

    pub fn retry_files_expired(&self, count: usize) {
        Self::incr(&self.retry_files_expired, "retry_files_expired", count as u64);
    }

    pub fn retry_failed(&self) {
        Self::incr(&self.retry_failures, "retry_failures", 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            payloads_enqueued: load(&self.payloads_enqueued),
            payloads_rejected: load(&self.payloads_rejected),
            payloads_dropped_oversize: load(&self.payloads_dropped_oversize),
            payloads_diverted: load(&self.payloads_diverted),
            batches_uploaded: load(&self.batches_uploaded),
            batches_failed: load(&self.batches_failed),
            batches_deferred: load(&self.batches_deferred),
            shards_uploaded: load(&self.shards_uploaded),
            fallback_files_written: load(&self.fallback_files_written),
            fallback_write_failures: load(&self.fallback_write_failures),
            retry_files_uploaded: load(&self.retry_files_uploaded),
            retry_files_quarantined: load(&self.retry_files_quarantined),
            retry_files_expired: load(&self.retry_files_expired),
            retry_failures: load(&self.retry_failures),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub payloads_enqueued: u64,
    pub payloads_rejected: u64,
    pub payloads_dropped_oversize: u64,
    pub payloads_diverted: u64,
    pub batches_uploaded: u64,
    pub batches_failed: u64,
    pub batches_deferred: u64,
    pub shards_uploaded: u64,
    pub fallback_files_written: u64,
    pub fallback_write_failures: u64,
    pub retry_files_uploaded: u64,
    pub retry_files_quarantined: u64,
    pub retry_files_expired: u64,
    pub retry_failures: u64,
}
