use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// Why a batch was flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Message count threshold reached
    Count,
    /// Byte size threshold reached, or the next payload would cross it
    Size,
    /// Oldest pending payload is older than the age limit
    Age,
    /// Final flush while the queue closes
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Count => "count",
            FlushReason::Size => "size",
            FlushReason::Age => "age",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Payloads accumulated since the last flush
#[derive(Debug, Default)]
pub struct Batch {
    payloads: Vec<Bytes>,
    total_bytes: usize,
    oldest: Option<Instant>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn push(&mut self, payload: Bytes) {
        if self.oldest.is_none() {
            self.oldest = Some(Instant::now());
        }
        self.total_bytes += payload.len();
        self.payloads.push(payload);
    }

    /// Whether adding `len` more bytes would push a non-empty batch past `max_bytes`.
    pub fn would_overflow(&self, len: usize, max_bytes: usize) -> bool {
        !self.is_empty() && self.total_bytes.saturating_add(len) > max_bytes
    }

    /// When the oldest payload reaches `max_age`
    pub fn deadline(&self, max_age: Duration) -> Option<Instant> {
        self.oldest.map(|oldest| oldest + max_age)
    }

    /// First flush trigger that currently holds, checked count, size, then age.
    pub fn flush_reason(
        &self,
        max_messages: usize,
        max_bytes: usize,
        max_age: Duration,
        now: Instant,
    ) -> Option<FlushReason> {
        if self.is_empty() {
            return None;
        }
        if self.payloads.len() >= max_messages {
            return Some(FlushReason::Count);
        }
        if self.total_bytes >= max_bytes {
            return Some(FlushReason::Size);
        }
        match self.deadline(max_age) {
            Some(deadline) if now >= deadline => Some(FlushReason::Age),
            _ => None,
        }
    }

    pub fn take(&mut self) -> Batch {
        std::mem::take(self)
    }

    /// Serialize as newline-delimited records and optionally gzip the result.
    pub fn seal(self, compress: bool) -> std::io::Result<SealedBatch> {
        let message_count = self.payloads.len();
        let mut raw = BytesMut::with_capacity(self.total_bytes + message_count);
        for payload in &self.payloads {
            raw.put_slice(payload);
            if !payload.ends_with(b"\n") {
                raw.put_u8(b'\n');
            }
        }
        let raw = raw.freeze();
        let original_size = raw.len();

        let body = if compress {
            let mut encoder = GzEncoder::new(
                Vec::with_capacity(original_size / 2),
                Compression::default(),
            );
            encoder.write_all(&raw)?;
            Bytes::from(encoder.finish()?)
        } else {
            raw.clone()
        };

        Ok(SealedBatch {
            body,
            raw,
            original_size,
            compressed: compress,
            message_count,
        })
    }
}

/// A flushed batch ready for the journal and the upload
#[derive(Debug, Clone)]
pub struct SealedBatch {
    /// Upload body, gzip when `compressed`
    pub body: Bytes,
    /// Uncompressed serialized form
    pub raw: Bytes,
    pub original_size: usize,
    pub compressed: bool,
    pub message_count: usize,
}

impl SealedBatch {
    pub fn object_key(&self, now: DateTime<Utc>) -> String {
        object_key(now, self.compressed)
    }
}

/// `<YYYY/MM/DD/HH>/<HHMMSSmmm>-<uuid>.log[.gz]`
pub fn object_key(now: DateTime<Utc>, compressed: bool) -> String {
    format!(
        "{}/{}-{}.log{}",
        now.format("%Y/%m/%d/%H"),
        now.format("%H%M%S%3f"),
        Uuid::now_v7(),
        if compressed { ".gz" } else { "" }
    )
}

pub fn shard_key(batch_key: &str, index: usize) -> String {
    format!("{batch_key}.shard-{index:05}")
}
