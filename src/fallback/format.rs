//! Preparing fallback file contents for resend
//!
//! Text files are resent with blank lines removed and line endings normalised
//! to `\n`. Files that look binary are replaced by a one-line placeholder that
//! records their size. Gzip files are judged by their decoded content.

use chrono::{DateTime, Local};
use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::warn;

/// Bytes inspected when classifying a file
pub const BINARY_SAMPLE_BYTES: usize = 1024;
/// Minimum share of printable bytes for a sample to count as text
pub const PRINTABLE_RATIO: f64 = 0.70;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open `path`, transparently decoding gzip content.
pub fn open_decoded(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7e | b'\n' | b'\r' | b'\t')
}

/// An empty sample is never binary.
pub fn is_binary_sample(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    let printable = sample.iter().filter(|b| is_printable(**b)).count();
    (printable as f64 / sample.len() as f64) < PRINTABLE_RATIO
}

/// Classify the first [`BINARY_SAMPLE_BYTES`] of `path`. A file that cannot be
/// sampled is treated as text.
pub fn is_binary(path: &Path) -> bool {
    match read_sample(path) {
        Ok(sample) => is_binary_sample(&sample),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to sample fallback file for binary detection");
            false
        }
    }
}

fn read_sample(path: &Path) -> io::Result<Vec<u8>> {
    let mut sample = Vec::with_capacity(BINARY_SAMPLE_BYTES);
    open_decoded(path)?
        .take(BINARY_SAMPLE_BYTES as u64)
        .read_to_end(&mut sample)?;
    Ok(sample)
}

/// Drop blank lines and terminate every remaining line with a single `\n`.
///
/// `\r\n`, `\r` and `\n` all end a line. Invalid UTF-8 is replaced.
pub fn normalize_lines(content: &[u8]) -> Vec<u8> {
    let mut normalized = Vec::with_capacity(content.len());
    for line in content.split(|b| *b == b'\n' || *b == b'\r') {
        let line = String::from_utf8_lossy(line);
        if line.trim().is_empty() {
            continue;
        }
        normalized.extend_from_slice(line.as_bytes());
        normalized.push(b'\n');
    }
    normalized
}

pub fn binary_placeholder(now: DateTime<Local>, original_size: u64) -> String {
    format!(
        "[{}] [INFO] FallbackRetry - resending binary fallback file, original size: {} bytes\n",
        now.format("%Y-%m-%dT%H:%M:%S%.3f"),
        original_size
    )
}

/// Body to upload for the fallback file at `path` of `size` bytes on disk.
pub fn format_for_upload(path: &Path, size: u64) -> io::Result<Vec<u8>> {
    if is_binary(path) {
        return Ok(binary_placeholder(Local::now(), size).into_bytes());
    }

    let mut content = Vec::new();
    open_decoded(path)?.read_to_end(&mut content)?;
    Ok(normalize_lines(&content))
}
