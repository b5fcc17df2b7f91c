//! Classify fetch errors into retry policy error kinds.

use super::error::FetchError;
use super::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 => ErrorKind::Throttled,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::Http5xx(code as u16),
        400..=499 => ErrorKind::Permanent,
        _ => ErrorKind::Permanent,
    }
}

/// Classify a curl-level error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_ssl_connect_error() || e.is_ssl_certproblem() || e.is_ssl_cipher() || e.is_peer_failed_verification() {
        return ErrorKind::Permanent;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Permanent
}

/// Classify a fetch error (curl, HTTP, or local) into an `ErrorKind`.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Curl(ce) => classify_curl_error(ce),
        FetchError::Http(code) => classify_http_status(*code),
        FetchError::PartialTransfer { .. } => ErrorKind::Connection,
        FetchError::StagingInconsistent { .. } => ErrorKind::Permanent,
        FetchError::Storage(_) => ErrorKind::Permanent,
        FetchError::Cancelled => ErrorKind::Permanent,
    }
}
