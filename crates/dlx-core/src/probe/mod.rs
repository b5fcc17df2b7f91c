//! Transport Probe: one request that discovers size, range support, and
//! resume validators before any segment plan is made.
//!
//! Prefers a HEAD request; if the origin won't answer HEAD usefully (no
//! `Content-Length`, or a non-2xx status), falls back to a ranged GET of
//! just the first byte and reads `Content-Range` instead. Never writes
//! anything to disk.

mod parse;

use std::collections::HashMap;
use std::str;
use std::time::Duration;

use crate::error::{DlxError, Result};

/// Strongest resume validator the origin offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    /// `ETag`, compared byte-for-byte (quotes stripped).
    Strong(String),
    /// `Last-Modified`, compared byte-for-byte.
    Weak(String),
    /// Neither header present; resume can only trust segment byte counts.
    None,
}

/// Immutable facts learned from the probe. Created once per job.
#[derive(Debug, Clone)]
pub struct RemoteDescriptor {
    /// Total length in bytes, if the origin declared one.
    pub total_len: Option<u64>,
    /// True if the origin supports `Range: bytes=`.
    pub accepts_ranges: bool,
    pub validator: Validator,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl RemoteDescriptor {
    /// True if `other`'s validator is incompatible with this one, meaning a
    /// resume against a journal recorded under `self` must restart instead.
    pub fn conflicts_with(&self, other: &RemoteDescriptor) -> bool {
        match (&self.validator, &other.validator) {
            (Validator::None, _) | (_, Validator::None) => false,
            (a, b) => a != b,
        }
    }
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_HEAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport knobs for a probe, sourced from [`crate::coordinator::DownloadOptions`].
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub tls_verify: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_HEAD_TIMEOUT,
            tls_verify: true,
        }
    }
}

fn apply_tls_verify(easy: &mut curl::easy::Easy, tls_verify: bool) -> Result<()> {
    if !tls_verify {
        easy.ssl_verify_peer(false).map_err(|e| DlxError::Unreachable(e.to_string()))?;
        easy.ssl_verify_host(false).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }
    Ok(())
}

/// Probes `url`, preferring HEAD and falling back to a 1-byte ranged GET.
/// Runs blocking I/O; call from `spawn_blocking` when invoked from async code.
#[tracing::instrument(skip(custom_headers, opts), fields(url = %url))]
pub fn probe(url: &str, custom_headers: &HashMap<String, String>, opts: &ProbeOptions) -> Result<RemoteDescriptor> {
    match head(url, custom_headers, opts) {
        Ok(Some(descriptor)) => Ok(descriptor),
        Ok(None) => ranged_probe(url, custom_headers, opts),
        Err(e) => {
            if matches!(e.kind(), crate::error::ErrorKind::NotFound | crate::error::ErrorKind::AuthRequired | crate::error::ErrorKind::Forbidden) {
                Err(e)
            } else {
                ranged_probe(url, custom_headers, opts)
            }
        }
    }
}

/// Attempts a HEAD request. Returns `Ok(None)` when the response lacked
/// enough information (no length, or no explicit range support either way)
/// and the caller should fall back to the ranged-GET probe.
fn head(url: &str, custom_headers: &HashMap<String, String>, opts: &ProbeOptions) -> Result<Option<RemoteDescriptor>> {
    let mut lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.nobody(true).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.follow_location(true).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.connect_timeout(opts.connect_timeout).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.timeout(opts.timeout).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    apply_tls_verify(&mut easy, opts.tls_verify)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
        transfer
            .perform()
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }

    let code = easy
        .response_code()
        .map_err(|e| DlxError::Unreachable(e.to_string()))?;
    classify_status(code)?;

    let parsed = parse::parse_headers(&lines);
    if parsed.content_length.is_none() {
        return Ok(None);
    }
    Ok(Some(RemoteDescriptor {
        total_len: parsed.content_length,
        accepts_ranges: parsed.accept_ranges,
        validator: pick_validator(parsed.etag, parsed.last_modified),
        content_type: parsed.content_type,
        content_disposition: parsed.content_disposition,
    }))
}

/// Falls back to `Range: bytes=0-0` and reads `Content-Range: bytes 0-0/<total>`.
fn ranged_probe(url: &str, custom_headers: &HashMap<String, String>, opts: &ProbeOptions) -> Result<RemoteDescriptor> {
    let mut lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.range("0-0").map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.follow_location(true).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.connect_timeout(opts.connect_timeout).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    easy.timeout(opts.timeout).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    apply_tls_verify(&mut easy, opts.tls_verify)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
        transfer
            .write_function(|data| Ok(data.len()))
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
        transfer
            .perform()
            .map_err(|e| DlxError::Unreachable(e.to_string()))?;
    }

    let code = easy
        .response_code()
        .map_err(|e| DlxError::Unreachable(e.to_string()))?;

    let parsed = parse::parse_headers(&lines);

    if code == 206 {
        let total = parsed.content_range_total;
        return Ok(RemoteDescriptor {
            total_len: total,
            accepts_ranges: true,
            validator: pick_validator(parsed.etag, parsed.last_modified),
            content_type: parsed.content_type,
            content_disposition: parsed.content_disposition,
        });
    }

    classify_status(code)?;

    // 200 with a full-length Content-Length: range support not honored.
    if let Some(total) = parsed.content_length {
        return Ok(RemoteDescriptor {
            total_len: Some(total),
            accepts_ranges: false,
            validator: pick_validator(parsed.etag, parsed.last_modified),
            content_type: parsed.content_type,
            content_disposition: parsed.content_disposition,
        });
    }

    Err(DlxError::RangeUnsupported)
}

fn pick_validator(etag: Option<String>, last_modified: Option<String>) -> Validator {
    match (etag, last_modified) {
        (Some(e), _) => Validator::Strong(e),
        (None, Some(lm)) => Validator::Weak(lm),
        (None, None) => Validator::None,
    }
}

fn classify_status(code: u32) -> Result<()> {
    match code {
        200..=299 => Ok(()),
        401 => Err(DlxError::AuthRequired),
        403 => Err(DlxError::Forbidden),
        404 => Err(DlxError::NotFound),
        412 => Err(DlxError::SourceChanged {
            detail: "412 Precondition Failed".to_string(),
        }),
        _ => Err(DlxError::Unreachable(format!("HTTP {code}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_with_differing_strong_validators() {
        let a = RemoteDescriptor {
            total_len: Some(10),
            accepts_ranges: true,
            validator: Validator::Strong("abc".into()),
            content_type: None,
            content_disposition: None,
        };
        let b = RemoteDescriptor {
            validator: Validator::Strong("xyz".into()),
            ..a.clone()
        };
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn no_conflict_when_either_side_lacks_validator() {
        let a = RemoteDescriptor {
            total_len: Some(10),
            accepts_ranges: true,
            validator: Validator::None,
            content_type: None,
            content_disposition: None,
        };
        let b = RemoteDescriptor {
            validator: Validator::Strong("xyz".into()),
            ..a.clone()
        };
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn no_conflict_when_validators_match() {
        let a = RemoteDescriptor {
            total_len: Some(10),
            accepts_ranges: true,
            validator: Validator::Weak("Wed, 21 Oct 2015 07:28:00 GMT".into()),
            content_type: None,
            content_disposition: None,
        };
        let b = a.clone();
        assert!(!a.conflicts_with(&b));
    }
}
