//! Error types for index, transfer and patch operations

use std::path::PathBuf;

use thiserror::Error;

/// Result type for zipsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// zipsync error types
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error that happened before any response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error reported by the archive writer
    #[error("Archive writer error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Bad magic number, truncated record or missing EOCD
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// Index checksum mismatch, truncated or undecodable index file
    #[error("Index file corrupted or out-of-date: {0}")]
    CorruptIndex(String),

    /// Malformed multipart/byteranges framing
    #[error("Corrupt multipart response: {0}")]
    CorruptMultipart(String),

    /// Compression method, ZIP64 or split archive we do not handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Range request failed; carries the response headers when there were any
    #[error("Transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        headers: Vec<(String, String)>,
    },

    /// Renaming the original archive to its backup name failed.
    /// The original is untouched.
    #[error("Failed to back up original archive {}: {source}", .original.display())]
    ArchiveReplace {
        original: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The original was moved to `backup` but `patched` could not be moved
    /// into its place. Needs manual recovery.
    #[error(
        "Failed to move patched archive {} into place; original saved as {}: {source}",
        .patched.display(),
        .backup.display()
    )]
    InconsistentState {
        backup: PathBuf,
        patched: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nothing to index or update in a directory
    #[error("No ZIP/JAR files found in {}", .0.display())]
    NoArchivesFound(PathBuf),
}
