use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::cleaner::cleanup_expired_files;
use super::error::{FallbackError, Result};
use super::format::format_for_upload;
use super::is_fallback_file;
use crate::config::FallbackConfig;
use crate::observability::Metrics;
use crate::queue::UploadError;
use crate::storage::StorageGateway;

/// Upload timeout for a single resent file
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const QUARANTINE_DIR: &str = "quarantine";
const RETRY_KEY_SUFFIX: &str = "/logx/";
const SECONDS_PER_DAY: u64 = 86_400;

/// Limits for one retry round. Zero limits from config are raised to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryLimits {
    pub retention: Duration,
    /// Larger files are quarantined instead of resent
    pub max_file_bytes: u64,
    pub max_files_per_round: usize,
    pub max_bytes_per_round: u64,
}

impl From<&FallbackConfig> for RetryLimits {
    fn from(config: &FallbackConfig) -> Self {
        Self {
            retention: Duration::from_secs(u64::from(config.retention_days.max(1)) * SECONDS_PER_DAY),
            max_file_bytes: config.max_retry_file_bytes.as_u64().max(1),
            max_files_per_round: config.max_retry_files_per_round.max(1),
            max_bytes_per_round: config.max_retry_bytes_per_round.as_u64().max(1),
        }
    }
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self::from(&FallbackConfig::default())
    }
}

/// Files and bytes resent so far in one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundQuota {
    pub processed_files: usize,
    pub processed_bytes: u64,
}

impl RoundQuota {
    /// Either counter has reached its limit
    pub fn exhausted(&self, limits: &RetryLimits) -> bool {
        self.processed_files >= limits.max_files_per_round
            || self.processed_bytes >= limits.max_bytes_per_round
    }

    /// Sending `size` more bytes would cross the byte limit. The first file of a
    /// round is always allowed.
    pub fn would_exceed(&self, size: u64, limits: &RetryLimits) -> bool {
        self.processed_files > 0
            && self.processed_bytes.saturating_add(size) > limits.max_bytes_per_round
    }

    #[must_use]
    pub fn record(self, size: u64) -> Self {
        Self {
            processed_files: self.processed_files + 1,
            processed_bytes: self.processed_bytes.saturating_add(size),
        }
    }
}

/// Outcome of one [`FallbackRetryJob::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub expired: usize,
    pub uploaded: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub quota: RoundQuota,
    /// The round stopped before visiting every candidate
    pub quota_reached: bool,
}

/// Expires and resends fallback files
pub struct FallbackRetryJob {
    root: PathBuf,
    gateway: Arc<dyn StorageGateway>,
    limits: RetryLimits,
    metrics: Arc<Metrics>,
    upload_timeout: Duration,
    round: Mutex<()>,
}

/// A fallback file found by the scan, in walk order
struct Candidate {
    path: PathBuf,
    size: Result<u64>,
}

impl FallbackRetryJob {
    pub fn new(
        root: impl Into<PathBuf>,
        gateway: Arc<dyn StorageGateway>,
        limits: RetryLimits,
        metrics: Arc<Metrics>,
    ) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root,
            gateway,
            limits,
            metrics,
            upload_timeout: UPLOAD_TIMEOUT,
            round: Mutex::new(()),
        }
    }

    pub fn with_upload_timeout(mut self, upload_timeout: Duration) -> Self {
        self.upload_timeout = upload_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &RetryLimits {
        &self.limits
    }

    /// Run one round: expire old files, then resend survivors within quota.
    ///
    /// Rounds are serialized: a call made while another round is running waits
    /// for it and then scans what is left. Never fails: errors are logged and
    /// reflected in the report.
    pub async fn run(&self) -> RetryReport {
        let _round = self.round.lock().await;

        let mut report = RetryReport {
            expired: self.expire().await,
            ..RetryReport::default()
        };

        if let Err(e) = self.retry_round(&mut report).await {
            error!(root = %self.root.display(), error = %e, "Fallback retry round failed");
        }

        debug!(?report, "Fallback retry round finished");
        report
    }

    async fn expire(&self) -> usize {
        let root = self.root.clone();
        let retention = self.limits.retention;
        let joined = tokio::task::spawn_blocking(move || {
            cleanup_expired_files(&root, retention, SystemTime::now())
        })
        .await;

        match joined {
            Ok(Ok(expired)) => {
                if expired > 0 {
                    self.metrics.retry_files_expired(expired);
                }
                expired
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to expire fallback files");
                0
            }
            Err(e) => {
                warn!(error = %e, "Fallback expiry task failed");
                0
            }
        }
    }

    async fn retry_round(&self, report: &mut RetryReport) -> Result<()> {
        let root = self.root.clone();
        let candidates = tokio::task::spawn_blocking(move || scan_candidates(&root))
            .await
            .map_err(io::Error::other)??;

        let mut quota = RoundQuota::default();

        for Candidate { path, size } in candidates {
            if quota.exhausted(&self.limits) {
                info!(
                    files = quota.processed_files,
                    bytes = quota.processed_bytes,
                    "Fallback retry quota reached"
                );
                report.quota_reached = true;
                break;
            }

            let size = match size {
                Ok(size) => size,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read fallback file size");
                    report.failed += 1;
                    continue;
                }
            };

            if quota.would_exceed(size, &self.limits) {
                info!(
                    file = %path.display(),
                    size,
                    bytes = quota.processed_bytes,
                    "Fallback retry byte quota reached before file"
                );
                report.quota_reached = true;
                break;
            }

            if size > self.limits.max_file_bytes {
                if self.quarantine(&path, size).await {
                    report.quarantined += 1;
                }
                continue;
            }

            match self.resend(&path, size).await {
                Ok(key) => {
                    quota = quota.record(size);
                    report.uploaded += 1;
                    self.metrics.retry_file_uploaded();
                    info!(key = %key, size, "Resent fallback file");
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.retry_failed();
                    warn!(file = %path.display(), error = %e, "Failed to resend fallback file");
                }
            }
        }

        report.quota = quota;
        Ok(())
    }

    async fn resend(&self, path: &Path, size: u64) -> Result<String> {
        let key = self.upload_key(path);
        let source = path.to_path_buf();
        let body = tokio::task::spawn_blocking(move || format_for_upload(&source, size))
            .await
            .map_err(io::Error::other)??;

        match timeout(self.upload_timeout, self.gateway.put_object(&key, Bytes::from(body))).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(UploadError::Storage { key, source }.into()),
            Err(_) => {
                return Err(UploadError::Timeout {
                    key,
                    timeout: self.upload_timeout,
                }
                .into());
            }
        }

        tokio::fs::remove_file(path).await?;
        Ok(key)
    }

    /// `<path relative to root>/logx/`, or the bare file name when the path is
    /// not under the root.
    pub fn upload_key(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.components().next().is_some() => {
                let segments: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect();
                format!("{}{}", segments.join("/"), RETRY_KEY_SUFFIX)
            }
            _ => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Move `path` to `<root>/quarantine/<name>.<epoch millis>.quarantine`.
    async fn quarantine(&self, path: &Path, size: u64) -> bool {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = self.root.join(QUARANTINE_DIR);
        let destination = dir.join(format!("{}.{}.quarantine", name, Utc::now().timestamp_millis()));

        let moved = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::rename(path, &destination).await
        }
        .await;

        match moved {
            Ok(()) => {
                self.metrics.retry_file_quarantined();
                error!(
                    file = %name,
                    size,
                    limit = self.limits.max_file_bytes,
                    quarantine = %destination.display(),
                    "Fallback file exceeds max retry size, moved to quarantine"
                );
                true
            }
            Err(e) => {
                error!(file = %name, error = %e, "Failed to quarantine oversized fallback file");
                false
            }
        }
    }

    /// Run a round every `period` until `shutdown` flips or its sender drops.
    ///
    /// Rounds never overlap; ticks missed during a slow round are skipped. Each
    /// round runs in its own task so a panic ends only that round.
    pub fn spawn_periodic(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let job = self.clone();
                        if let Err(e) = tokio::spawn(async move { job.run().await }).await {
                            error!(error = %e, "Fallback retry round aborted");
                        }
                    }
                }
            }

            debug!("Fallback retry driver stopped");
        })
    }
}

/// Collect every fallback file under `root`. A missing root yields nothing.
fn scan_candidates(root: &Path) -> Result<Vec<Candidate>> {
    if !root.exists() {
        warn!(root = %root.display(), "Fallback directory does not exist");
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        return Err(FallbackError::RootNotDirectory(root.to_path_buf()));
    }

    let mut candidates = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable fallback entry");
                continue;
            }
        };
        if !is_fallback_file(&entry) {
            continue;
        }

        candidates.push(Candidate {
            size: entry.metadata().map(|m| m.len()).map_err(FallbackError::Walk),
            path: entry.into_path(),
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::RecordingGateway;
    use std::fs;
    use tempfile::TempDir;

    fn limits(max_file_bytes: u64, max_files: usize, max_bytes: u64) -> RetryLimits {
        RetryLimits {
            retention: Duration::from_secs(7 * SECONDS_PER_DAY),
            max_file_bytes,
            max_files_per_round: max_files,
            max_bytes_per_round: max_bytes,
        }
    }

    fn write_file(root: &Path, relative: &str, content: &[u8]) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn job(root: &Path, gateway: Arc<RecordingGateway>, limits: RetryLimits) -> FallbackRetryJob {
        FallbackRetryJob::new(root, gateway, limits, Arc::new(Metrics::new()))
    }

    fn remaining(root: &Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(is_fallback_file)
            .count()
    }

    #[test]
    fn test_round_quota_checks() {
        let limits = limits(100, 2, 50);
        let quota = RoundQuota::default();

        assert!(!quota.exhausted(&limits));
        // first file may exceed the byte budget on its own
        assert!(!quota.would_exceed(80, &limits));

        let quota = quota.record(30);
        assert!(quota.would_exceed(21, &limits));
        assert!(!quota.would_exceed(20, &limits));

        let quota = quota.record(20);
        assert_eq!(
            quota,
            RoundQuota {
                processed_files: 2,
                processed_bytes: 50
            }
        );
        assert!(quota.exhausted(&limits));
    }

    #[test]
    fn test_limits_clamp_zero() {
        let config = FallbackConfig {
            retention_days: 0,
            max_retry_file_bytes: crate::humanize::ByteSize(0),
            max_retry_files_per_round: 0,
            max_retry_bytes_per_round: crate::humanize::ByteSize(0),
            ..FallbackConfig::default()
        };

        let limits = RetryLimits::from(&config);
        assert_eq!(limits.retention, Duration::from_secs(SECONDS_PER_DAY));
        assert_eq!(limits.max_file_bytes, 1);
        assert_eq!(limits.max_files_per_round, 1);
        assert_eq!(limits.max_bytes_per_round, 1);
    }

    #[test]
    fn test_upload_key() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path(), Arc::new(RecordingGateway::new()), limits(100, 10, 1000));

        let nested = job.root().join("2025-01-02").join("app_1.log.gz");
        assert_eq!(job.upload_key(&nested), "2025-01-02/app_1.log.gz/logx/");
        assert_eq!(
            job.upload_key(Path::new("/elsewhere/app_2.log.gz")),
            "app_2.log.gz"
        );
    }

    #[tokio::test]
    async fn test_oversize_file_is_quarantined_not_uploaded() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let gateway = Arc::new(RecordingGateway::new());
        let big = write_file(root, "d/big.log.gz", &[b'x'; 200]);
        write_file(root, "d/small.log.gz", b"ok\n");

        let report = job(root, gateway.clone(), limits(100, 10, 10_000)).run().await;

        assert_eq!(report.quarantined, 1);
        assert_eq!(report.uploaded, 1);
        // quarantined files do not count against the round quota
        assert_eq!(
            report.quota,
            RoundQuota {
                processed_files: 1,
                processed_bytes: 3
            }
        );
        assert!(!big.exists());
        let quarantined: Vec<String> = fs::read_dir(root.join(QUARANTINE_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].starts_with("big.log.gz."));
        assert!(quarantined[0].ends_with(".quarantine"));

        let uploads = gateway.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "d/small.log.gz/logx/");
    }

    #[tokio::test]
    async fn test_file_quota_leaves_rest_for_next_round() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let gateway = Arc::new(RecordingGateway::new());
        for i in 0..5 {
            write_file(root, &format!("d/app_{i}.log.gz"), b"line\n");
        }

        let job = job(root, gateway.clone(), limits(100, 3, 10_000));
        let report = job.run().await;

        assert_eq!(report.uploaded, 3);
        assert!(report.quota_reached);
        assert_eq!(gateway.uploads().len(), 3);
        assert_eq!(remaining(root), 2);

        let report = job.run().await;
        assert_eq!(report.uploaded, 2);
        assert_eq!(remaining(root), 0);
    }

    #[tokio::test]
    async fn test_byte_quota_stops_before_crossing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let gateway = Arc::new(RecordingGateway::new());
        for i in 0..3 {
            write_file(root, &format!("d/app_{i}.log.gz"), &[b'a'; 40]);
        }

        let report = job(root, gateway.clone(), limits(100, 10, 100)).run().await;

        assert_eq!(report.uploaded, 2);
        assert_eq!(report.quota.processed_bytes, 80);
        assert!(report.quota_reached);
        assert_eq!(remaining(root), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_file_and_continues() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let gateway = Arc::new(RecordingGateway::failing());
        write_file(root, "d/a.log.gz", b"a\n");
        write_file(root, "d/b.log.gz", b"b\n");

        let report = job(root, gateway.clone(), limits(100, 10, 1000)).run().await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.quota, RoundQuota::default());
        assert_eq!(remaining(root), 2);

        gateway.set_failing(false);
        let report = job(root, gateway.clone(), limits(100, 10, 1000)).run().await;
        assert_eq!(report.uploaded, 2);
        assert_eq!(remaining(root), 0);
    }

    #[test]
    fn test_scan_lists_only_fallback_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_file(root, "d/app_1.log.gz", b"one\n");
        write_file(root, "d/.tmpXyZ123.partial", b"half");
        write_file(root, "d/notes.txt", b"n");

        let candidates = scan_candidates(root).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].path.ends_with("d/app_1.log.gz"));
        assert_eq!(candidates[0].size.as_ref().unwrap(), &4);

        let not_dir = write_file(root, "plain.log.gz", b"x");
        assert!(matches!(
            scan_candidates(&not_dir),
            Err(FallbackError::RootNotDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_is_a_quiet_round() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::new());

        let report = job(&temp_dir.path().join("absent"), gateway, limits(1, 1, 1))
            .run()
            .await;
        assert_eq!(report, RetryReport::default());
    }

    #[tokio::test]
    async fn test_periodic_driver_runs_rounds_until_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let gateway = Arc::new(RecordingGateway::new());
        write_file(root, "d/a.log.gz", b"a\n");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let job = Arc::new(job(root, gateway.clone(), limits(100, 10, 1000)));
        let handle = job.spawn_periodic(Duration::from_millis(10), shutdown_rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.uploads().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send_replace(true);
        handle.await.unwrap();
        assert_eq!(remaining(root), 0);
    }
}
