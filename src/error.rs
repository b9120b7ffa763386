//! Crate-wide error type.
//!
//! Mirrors the error kinds fixed by the storage/indexing design: every
//! fallible operation in this crate returns one of these variants rather
//! than a generic boxed error, so callers can match on `kind` instead of
//! string-sniffing messages.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("chunking failed: {reason}")]
    ChunkingFailed { reason: String },

    #[error("embedding failed: {cause}")]
    EmbeddingFailed { cause: String },

    #[error("storage I/O failed at {path}: {cause}")]
    StorageIoFailed { path: PathBuf, cause: String },

    #[error("index corrupt: {index}: {reason}")]
    IndexCorrupt { index: String, reason: String },

    #[error("lock unavailable: {lock}")]
    LockUnavailable { lock: String },

    #[error("invalid query parameters: {reason}")]
    InvalidQueryParameters { reason: String },

    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("config parse error in {path}: {cause}")]
    ConfigParseError { path: PathBuf, cause: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn storage_io(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::StorageIoFailed {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// A stable, machine-matchable kind name (used in logging and tests).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChunkingFailed { .. } => "ChunkingFailed",
            Self::EmbeddingFailed { .. } => "EmbeddingFailed",
            Self::StorageIoFailed { .. } => "StorageIOFailed",
            Self::IndexCorrupt { .. } => "IndexCorrupt",
            Self::LockUnavailable { .. } => "LockUnavailable",
            Self::InvalidQueryParameters { .. } => "InvalidQueryParameters",
            Self::Timeout { .. } => "Timeout",
            Self::NotFound { .. } => "NotFound",
            Self::ConfigParseError { .. } => "ConfigParseError",
            Self::Json(_) => "Json",
            Self::Io(_) => "Io",
        }
    }
}
