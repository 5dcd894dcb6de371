mod common;

use common::InstrumentedGateway;
use logvault::fallback::{FallbackRetryJob, FallbackSink, FallbackStore, RetryLimits};
use logvault::observability::Metrics;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn limits(max_files_per_round: usize) -> RetryLimits {
    RetryLimits {
        retention: Duration::from_secs(7 * 86_400),
        max_file_bytes: 1024 * 1024,
        max_files_per_round,
        max_bytes_per_round: 64 * 1024 * 1024,
    }
}

fn count_fallback_files(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.file_name().to_string_lossy().ends_with(".log.gz")
        })
        .count()
}

#[tokio::test]
async fn test_written_file_is_resent_once_and_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let store = FallbackStore::new(temp_dir.path(), "rt").unwrap();
    let gateway = Arc::new(InstrumentedGateway::new());
    let metrics = Arc::new(Metrics::new());

    let path = store
        .write_fallback_file(b"2025-01-01 INFO started\r\n\r\n2025-01-01 INFO stopped\n")
        .unwrap();

    let job = FallbackRetryJob::new(store.root(), gateway.clone(), limits(10), metrics.clone());
    let report = job.run().await;

    assert_eq!(report.uploaded, 1);
    assert!(!path.exists());

    let uploads = gateway.uploads();
    assert_eq!(uploads.len(), 1);
    let relative = path.strip_prefix(store.root()).unwrap();
    let expected_key = format!(
        "{}/{}/logx/",
        relative.parent().unwrap().display(),
        relative.file_name().unwrap().to_string_lossy()
    );
    assert_eq!(uploads[0].0, expected_key);
    assert_eq!(
        &uploads[0].1[..],
        b"2025-01-01 INFO started\n2025-01-01 INFO stopped\n"
    );

    // nothing left to resend
    let report = job.run().await;
    assert_eq!(report.uploaded, 0);
    assert_eq!(gateway.uploads().len(), 1);
    assert_eq!(metrics.snapshot().retry_files_uploaded, 1);
}

#[tokio::test]
async fn test_file_quota_uploads_exactly_k_of_n() {
    let temp_dir = TempDir::new().unwrap();
    let store = FallbackStore::new(temp_dir.path(), "quota").unwrap();
    let gateway = Arc::new(InstrumentedGateway::new());

    for i in 0..6 {
        store
            .write_fallback_file(format!("payload {i}\n").as_bytes())
            .unwrap();
    }

    let job = FallbackRetryJob::new(
        store.root(),
        gateway.clone(),
        limits(4),
        Arc::new(Metrics::new()),
    );
    let report = job.run().await;

    assert_eq!(report.uploaded, 4);
    assert!(report.quota_reached);
    assert_eq!(gateway.uploads().len(), 4);
    assert_eq!(count_fallback_files(store.root()), 2);
}

#[tokio::test]
async fn test_upload_timeout_leaves_file_for_next_round() {
    let temp_dir = TempDir::new().unwrap();
    let store = FallbackStore::new(temp_dir.path(), "slow").unwrap();
    let gateway = Arc::new(InstrumentedGateway::with_delay(Duration::from_millis(200)));
    store.write_fallback_file(b"late\n").unwrap();

    let job = FallbackRetryJob::new(
        store.root(),
        gateway.clone(),
        limits(10),
        Arc::new(Metrics::new()),
    )
    .with_upload_timeout(Duration::from_millis(10));
    let report = job.run().await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(count_fallback_files(store.root()), 1);
}

#[tokio::test]
async fn test_rounds_never_overlap() {
    let temp_dir = TempDir::new().unwrap();
    let store = FallbackStore::new(temp_dir.path(), "overlap").unwrap();
    let gateway = Arc::new(InstrumentedGateway::with_delay(Duration::from_millis(300)));
    store.write_fallback_file(b"once\n").unwrap();
    store.write_fallback_file(b"twice\n").unwrap();

    let job = Arc::new(FallbackRetryJob::new(
        store.root(),
        gateway.clone(),
        limits(10),
        Arc::new(Metrics::new()),
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let driver = job.clone().spawn_periodic(Duration::from_millis(50), shutdown_rx);

    // lands while the periodic round is uploading its first file
    tokio::time::sleep(Duration::from_millis(150)).await;
    let manual = job.run().await;

    assert_eq!(manual.uploaded, 0);
    assert_eq!(manual.failed, 0);
    assert_eq!(gateway.uploads().len(), 2);
    assert_eq!(gateway.max_in_flight(), 1);
    assert_eq!(count_fallback_files(store.root()), 0);

    shutdown_tx.send_replace(true);
    driver.await.unwrap();
}
