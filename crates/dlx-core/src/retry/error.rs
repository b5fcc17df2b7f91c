//! Segment fetch error type, classified before surfacing as a `DlxError`.

use std::fmt;

/// Error returned by a single segment fetch attempt.
#[derive(Debug)]
pub enum FetchError {
    /// Curl reported an error (timeout, connection, TLS, etc.).
    Curl(curl::Error),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// Transfer completed but fewer bytes arrived than the range requested.
    PartialTransfer { expected: u64, received: u64 },
    /// Staging file length didn't match `segment.bytes_written` before the write.
    StagingInconsistent { index: usize, detail: String },
    /// Write to the staging file failed (disk full, permission denied).
    Storage(std::io::Error),
    /// Cancellation token was observed mid-transfer.
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Curl(e) => write!(f, "{e}"),
            FetchError::Http(code) => write!(f, "HTTP {code}"),
            FetchError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: expected {expected} bytes, got {received}")
            }
            FetchError::StagingInconsistent { index, detail } => {
                write!(f, "staging inconsistent for segment {index}: {detail}")
            }
            FetchError::Storage(e) => write!(f, "storage: {e}"),
            FetchError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Curl(e) => Some(e),
            FetchError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
