//! Segment Fetcher: drives one ranged GET, streaming bytes into the
//! segment's staging file and (optionally) an incremental digest.
//!
//! Runs synchronously on a blocking thread (`tokio::task::spawn_blocking`
//! from the Scheduler); cancellation is cooperative, polled between
//! buffered write chunks so a cancelled job stops promptly without
//! tearing a chunk in half.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::digest::Hasher;
use crate::plan::Segment;
use crate::probe::Validator;
use crate::retry::FetchError;
use crate::staging::StagingLayout;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub enum FetchOutcome {
    Completed { digest: Option<String> },
    Cancelled,
}

/// Transport knobs for a segment fetch, sourced from
/// [`crate::coordinator::DownloadOptions`].
#[derive(Debug, Clone, Copy)]
pub struct FetchTransportOptions {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub tls_verify: bool,
}

impl Default for FetchTransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            tls_verify: true,
        }
    }
}

/// Fetches `segment` starting at `bytes_written_before` (the current
/// length of its staging file), appending into `file` as bytes arrive.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip(custom_headers, file, validator, cancel, progress_counter, digest_hasher, transport), fields(segment = index, len = segment.len()))]
pub fn fetch(
    index: usize,
    url: &str,
    custom_headers: &HashMap<String, String>,
    segment: &Segment,
    bytes_written_before: u64,
    file: &File,
    validator: &Validator,
    cancel: Arc<AtomicBool>,
    progress_counter: Arc<AtomicU64>,
    mut digest_hasher: Option<Hasher>,
    transport: FetchTransportOptions,
) -> Result<FetchOutcome, FetchError> {
    let on_disk_len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let segment_len = segment.len();
    let already_have = on_disk_len.min(segment_len);
    if already_have != bytes_written_before {
        return Err(FetchError::StagingInconsistent {
            index,
            detail: format!(
                "journal recorded {bytes_written_before} bytes written but staging file has {on_disk_len}"
            ),
        });
    }

    if bytes_written_before >= segment_len {
        return Ok(FetchOutcome::Completed {
            digest: digest_hasher.take().map(Hasher::finalize_hex),
        });
    }

    progress_counter.store(bytes_written_before, Ordering::Relaxed);
    let received_this_call = Arc::new(AtomicU64::new(0));
    let received_cb = Arc::clone(&received_this_call);
    let progress_cb = Arc::clone(&progress_counter);
    let write_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let write_error_cb = Arc::clone(&write_error);
    let cancel_cb = Arc::clone(&cancel);
    let digest_cb: Arc<Mutex<Option<Hasher>>> = Arc::new(Mutex::new(digest_hasher.take()));
    let digest_cb_inner = Arc::clone(&digest_cb);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(FetchError::Curl)?;
    easy.follow_location(true).map_err(FetchError::Curl)?;
    easy.connect_timeout(transport.connect_timeout).map_err(FetchError::Curl)?;
    easy.low_speed_limit(1024).map_err(FetchError::Curl)?;
    easy.low_speed_time(transport.idle_timeout).map_err(FetchError::Curl)?;
    if !transport.tls_verify {
        easy.ssl_verify_peer(false).map_err(FetchError::Curl)?;
        easy.ssl_verify_host(false).map_err(FetchError::Curl)?;
    }

    let range_start = segment.start + bytes_written_before;
    let range_value = format!("{}-{}", range_start, segment.end.saturating_sub(1));
    easy.range(&range_value).map_err(FetchError::Curl)?;

    let mut list = curl::easy::List::new();
    match validator {
        Validator::Strong(etag) => {
            list.append(&format!("If-Match: \"{etag}\"")).map_err(FetchError::Curl)?;
        }
        Validator::Weak(lm) => {
            list.append(&format!("If-Unmodified-Since: {lm}")).map_err(FetchError::Curl)?;
        }
        Validator::None => {}
    }
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim())).map_err(FetchError::Curl)?;
    }
    easy.http_headers(list).map_err(FetchError::Curl)?;

    let base_offset = bytes_written_before;
    let file_for_cb = file.try_clone().map_err(FetchError::Storage)?;

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(move |data| {
                if cancel_cb.load(Ordering::Relaxed) {
                    return Ok(0);
                }
                let off = received_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                match StagingLayout::write_segment_at(&file_for_cb, base_offset + off, data) {
                    Ok(()) => {
                        progress_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                        if let Some(h) = digest_cb_inner.lock().unwrap().as_mut() {
                            h.update(data);
                        }
                        Ok(data.len())
                    }
                    Err(e) => {
                        *write_error_cb.lock().unwrap() = Some(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            e.to_string(),
                        ));
                        Ok(0)
                    }
                }
            })
            .map_err(FetchError::Curl)?;

        if let Err(e) = transfer.perform() {
            if cancel.load(Ordering::Relaxed) {
                return Ok(FetchOutcome::Cancelled);
            }
            if let Some(io_err) = write_error.lock().unwrap().take() {
                return Err(FetchError::Storage(io_err));
            }
            return Err(FetchError::Curl(e));
        }
    }

    if cancel.load(Ordering::Relaxed) {
        return Ok(FetchOutcome::Cancelled);
    }

    let code = easy.response_code().map_err(FetchError::Curl)? as u32;
    if code == 412 {
        return Err(FetchError::Http(412));
    }
    if !(200..300).contains(&code) {
        return Err(FetchError::Http(code));
    }

    let received = received_this_call.load(Ordering::Relaxed);
    let expected = segment_len - bytes_written_before;
    if received != expected {
        return Err(FetchError::PartialTransfer {
            expected: segment_len,
            received: bytes_written_before + received,
        });
    }

    let digest = digest_cb.lock().unwrap().take().map(Hasher::finalize_hex);
    Ok(FetchOutcome::Completed { digest })
}
