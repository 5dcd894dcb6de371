//! Local fallback files
//!
//! Payloads that cannot go through the batching queue are persisted under the
//! fallback root as gzip files ending in [`FALLBACK_FILE_SUFFIX`]. The retry job
//! expires old files and resends the rest in quota-bounded rounds.

pub mod cleaner;
pub mod error;
pub mod format;
pub mod retry;
pub mod store;

pub use cleaner::cleanup_expired_files;
pub use error::{FallbackError, Result};
pub use retry::{FallbackRetryJob, RetryLimits, RetryReport, RoundQuota};
pub use store::{FallbackSink, FallbackStore};

use walkdir::DirEntry;

/// Suffix of every fallback file; the cleaner and the retry job match only these.
pub const FALLBACK_FILE_SUFFIX: &str = ".log.gz";
/// Suffix of a fallback file still being written
pub const PARTIAL_FILE_SUFFIX: &str = ".partial";

pub(crate) fn is_fallback_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file()
        && entry
            .file_name()
            .to_string_lossy()
            .ends_with(FALLBACK_FILE_SUFFIX)
}

/// Temp file left behind by a write that never reached its rename
pub(crate) fn is_partial_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file()
        && entry
            .file_name()
            .to_string_lossy()
            .ends_with(PARTIAL_FILE_SUFFIX)
}
