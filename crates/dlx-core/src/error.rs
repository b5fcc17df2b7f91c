//! Closed error-kind enumeration for the download engine.
//!
//! Every component surfaces failures through `DlxError` so callers can match
//! on a stable `ErrorKind` without depending on `Display` text, the way the
//! segment-level `SegmentError`/`ValidationError` pair worked in the single-file
//! downloader this engine grew out of, generalized to cover a whole job.

use std::path::PathBuf;

/// Stable classification of a failure, independent of its human-readable detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unreachable,
    AuthRequired,
    NotFound,
    Forbidden,
    SourceChanged,
    RangeUnsupported,
    IoFull,
    IoPermission,
    StagingInconsistent,
    IntegrityMismatch,
    Busy,
    Cancelled,
    Timeout,
    TlsFailure,
    InternalInvariant,
}

/// Top-level error type returned by every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum DlxError {
    #[error("origin unreachable: {0}")]
    Unreachable(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("resource not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("source changed since last resume ({detail}); restart required")]
    SourceChanged { detail: String },

    #[error("origin does not support byte ranges")]
    RangeUnsupported,

    #[error("disk full writing {path}")]
    IoFull { path: PathBuf },

    #[error("permission denied writing {path}")]
    IoPermission { path: PathBuf },

    #[error("staging file inconsistent for segment {index}: {detail}")]
    StagingInconsistent { index: usize, detail: String },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("a job is already using staging directory {0}")]
    Busy(PathBuf),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("TLS validation failed: {0}")]
    TlsFailure(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal error: {0}")]
    Journal(String),
}

impl DlxError {
    /// Stable kind for callers that want to match without parsing `Display` text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DlxError::Unreachable(_) => ErrorKind::Unreachable,
            DlxError::AuthRequired => ErrorKind::AuthRequired,
            DlxError::NotFound => ErrorKind::NotFound,
            DlxError::Forbidden => ErrorKind::Forbidden,
            DlxError::SourceChanged { .. } => ErrorKind::SourceChanged,
            DlxError::RangeUnsupported => ErrorKind::RangeUnsupported,
            DlxError::IoFull { .. } => ErrorKind::IoFull,
            DlxError::IoPermission { .. } => ErrorKind::IoPermission,
            DlxError::StagingInconsistent { .. } => ErrorKind::StagingInconsistent,
            DlxError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            DlxError::Busy(_) => ErrorKind::Busy,
            DlxError::Cancelled => ErrorKind::Cancelled,
            DlxError::Timeout(_) => ErrorKind::Timeout,
            DlxError::TlsFailure(_) => ErrorKind::TlsFailure,
            DlxError::InternalInvariant(_) => ErrorKind::InternalInvariant,
            DlxError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => ErrorKind::IoPermission,
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::InternalInvariant,
            },
            DlxError::Journal(_) => ErrorKind::InternalInvariant,
        }
    }
}

pub type Result<T> = std::result::Result<T, DlxError>;
