use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::{FALLBACK_FILE_SUFFIX, PARTIAL_FILE_SUFFIX};
use super::error::{FallbackError, Result};

/// Durable destination for payloads that could not be uploaded
pub trait FallbackSink: Send + Sync {
    /// Persist `payload` and return the path of the written file.
    fn write_fallback_file(&self, payload: &[u8]) -> Result<PathBuf>;
}

/// Writes gzip fallback files under `<root>/<YYYY-MM-DD>/`.
///
/// Each file is written to a hidden temporary in the target directory and
/// renamed into place, so readers only ever see complete `.log.gz` files.
#[derive(Debug, Clone)]
pub struct FallbackStore {
    root: PathBuf,
    prefix: String,
}

impl FallbackStore {
    /// Create the store, creating `root` if needed. Relative roots are resolved
    /// against the current directory.
    pub fn new(root: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        if root.exists() && !root.is_dir() {
            return Err(FallbackError::RootNotDirectory(root));
        }
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            prefix: prefix.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(&self, now: DateTime<Local>) -> String {
        format!(
            "{}_{}_{}{}",
            self.prefix,
            now.format("%Y%m%d%H%M%S%3f"),
            Uuid::now_v7().simple(),
            FALLBACK_FILE_SUFFIX
        )
    }
}

impl FallbackSink for FallbackStore {
    fn write_fallback_file(&self, payload: &[u8]) -> Result<PathBuf> {
        let now = Local::now();
        let dir = self.root.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir)?;
        let target = dir.join(self.file_name(now));

        // ".tmpXXXX.partial" never matches the fallback suffix
        let partial = tempfile::Builder::new()
            .prefix(".")
            .suffix(PARTIAL_FILE_SUFFIX)
            .tempfile_in(&dir)?;

        let mut encoder = GzEncoder::new(partial, Compression::default());
        encoder.write_all(payload)?;
        let partial = encoder.finish()?;
        partial.as_file().sync_all()?;
        partial.persist(&target).map_err(|e| e.error)?;

        debug!(path = %target.display(), size = payload.len(), "Fallback file written");
        Ok(target)
    }
}
