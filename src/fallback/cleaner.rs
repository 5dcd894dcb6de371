//! Retention-based expiry of fallback files

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::error::{FallbackError, Result};
use super::{is_fallback_file, is_partial_file};

/// Delete every fallback file under `root` older than `retention` at `now`,
/// along with partial files abandoned for as long.
///
/// Returns the number of deleted files. A missing root is not an error; a file
/// that cannot be inspected or removed is logged and skipped.
pub fn cleanup_expired_files(root: &Path, retention: Duration, now: SystemTime) -> Result<usize> {
    if !root.exists() {
        debug!(root = %root.display(), "Fallback root missing, nothing to expire");
        return Ok(0);
    }
    if !root.is_dir() {
        return Err(FallbackError::RootNotDirectory(root.to_path_buf()));
    }

    let mut deleted = 0;

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable fallback entry");
                continue;
            }
        };
        if !is_fallback_file(&entry) && !is_partial_file(&entry) {
            continue;
        }

        let age = match file_age(&entry, now) {
            Ok(age) => age,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot determine fallback file age");
                continue;
            }
        };
        if age <= retention {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                deleted += 1;
                debug!(path = %entry.path().display(), age_secs = age.as_secs(), "Expired fallback file deleted");
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to delete expired fallback file");
            }
        }
    }

    if deleted > 0 {
        info!(deleted, retention_secs = retention.as_secs(), "Expired fallback files removed");
    }
    Ok(deleted)
}

fn file_age(entry: &DirEntry, now: SystemTime) -> Result<Duration> {
    let modified = entry.metadata()?.modified()?;
    // modification times in the future count as fresh
    Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
}
