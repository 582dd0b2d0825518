//! Error types for the overlay store and activation engine.

use std::path::PathBuf;

use thiserror::Error;

/// Every failure mode the core can produce, carrying the context needed to
/// act on it without re-deriving it from a string message.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("fetch failed for {uri}: {message}")]
    FetchFailed { uri: String, message: String },

    #[error("unsupported compression in {path}: magic bytes did not match gzip, zstd, or xz")]
    UnsupportedCompression { path: PathBuf },

    #[error("corrupt archive {path}: {message}")]
    CorruptArchive { path: PathBuf, message: String },

    #[error("path traversal rejected: entry {entry:?} in archive {archive} escapes base {base}")]
    PathTraversal {
        archive: String,
        entry: String,
        base: PathBuf,
    },

    #[error("etc target conflict: \"{target}\" declared by both \"{first}\" and \"{second}\"")]
    EtcTargetConflict {
        target: String,
        first: String,
        second: String,
    },

    #[error("etc promotion found non-symlink obstruction(s): {0:?}")]
    EtcNonSymlinkObstruction(Vec<String>),

    #[error("systemd job failed for {unit} ({verb}): {message}")]
    SystemdJobFailed {
        unit: String,
        verb: String,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
