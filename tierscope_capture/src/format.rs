//! Format detection for telemetry files
//!
//! Benchmark runs are sometimes archived with their JSONL files zstd
//! compressed. This module decides which reader to use by examining magic
//! bytes and file extensions.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Magic number opening every zstd frame.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// The format of a telemetry file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// JSON Lines, potentially zstd-compressed
    Jsonl {
        /// Whether the file is zstd-compressed
        compressed: bool,
    },
}

/// Errors during format detection
#[derive(thiserror::Error, Debug)]
pub enum DetectionError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detects the format of a telemetry file.
///
/// Detection strategy:
/// 1. Check for the zstd frame magic at the head of the file
/// 2. Fall back to extension-based detection
/// 3. Default to uncompressed JSONL
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<RecordFormat, DetectionError> {
    let path = path.as_ref();

    let mut file = File::open(path)?;
    let mut header_magic = [0u8; 4];
    if file.read_exact(&mut header_magic).is_ok() && header_magic == ZSTD_MAGIC {
        return Ok(RecordFormat::Jsonl { compressed: true });
    }

    if let Some(ext) = path.extension()
        && (ext == "zstd" || ext == "zst")
    {
        return Ok(RecordFormat::Jsonl { compressed: true });
    }

    Ok(RecordFormat::Jsonl { compressed: false })
}
