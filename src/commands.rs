use logvault::config::{Config, ConfigError};
use logvault::fallback::{FallbackRetryJob, RetryLimits};
use logvault::observability::Metrics;
use logvault::storage::{ObjectStoreGateway, StorageGateway};
use logvault::LogEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn load_config(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

/// Ship every stdin line as one payload.
pub async fn ship(config_path: Option<PathBuf>) -> Result<(), AnyError> {
    let config = load_config(config_path)?;
    let engine = LogEngine::from_config(&config)?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shipped = 0u64;

    let read_result: std::io::Result<()> = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    engine.put(line);
                    shipped += 1;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },
            _ = &mut shutdown => break Ok(()),
        }
    };

    // flush whatever was accepted even if stdin failed
    engine.close().await;
    info!(shipped, "Shipping finished");
    read_result?;

    println!("{}", serde_json::to_string_pretty(&engine.metrics())?);
    Ok(())
}

/// Run a single fallback retry round against the configured storage.
pub async fn retry(config_path: Option<PathBuf>) -> Result<(), AnyError> {
    let config = load_config(config_path)?;
    let gateway = Arc::new(ObjectStoreGateway::from_config(&config.storage)?);

    let job = FallbackRetryJob::new(
        &config.fallback.path,
        gateway.clone(),
        RetryLimits::from(&config.fallback),
        Arc::new(Metrics::new()),
    );
    let report = job.run().await;
    gateway.close();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
