//! Per-job options overriding the process-wide [`crate::config::DlxConfig`]
//! defaults, playing the same role as a per-job settings record but expanded
//! to the full options enumeration this engine exposes.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::DlxConfig;
use crate::digest::Algorithm;

pub use crate::assembler::ExpectedDigest;

/// Whether per-segment digests are computed in addition to the mandatory
/// whole-file digest. Per-segment digests are a diagnostic aid only; the
/// Assembler never trusts them in place of the whole-file check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestPolicy {
    #[default]
    WholeOnly,
    PerSegmentAndWhole,
}

/// Caller-supplied overrides for one job. Any field left at its default
/// inherits the corresponding `DlxConfig` value when built via
/// [`DownloadOptions::from_config`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub max_parallelism: usize,
    pub target_segment_size: u64,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Merged with reserved headers (`Range`, `If-Match`, `If-Unmodified-Since`)
    /// generated internally; caller entries take precedence on collision
    /// outside of those reserved names.
    pub headers: HashMap<String, String>,
    pub tls_verify: bool,
    pub expected_digest: Option<ExpectedDigest>,
    pub digest_policy: DigestPolicy,
    pub overwrite: bool,
    pub progress_interval: Duration,
}

const RESERVED_HEADERS: &[&str] = &["range", "if-match", "if-unmodified-since"];

impl DownloadOptions {
    /// Builds job options from the process-wide config, with no per-job
    /// overrides applied yet.
    pub fn from_config(cfg: &DlxConfig) -> Self {
        Self {
            max_parallelism: cfg.max_parallelism,
            target_segment_size: cfg.target_segment_size,
            max_attempts: cfg.max_attempts,
            connect_timeout: cfg.connect_timeout(),
            idle_timeout: cfg.idle_timeout(),
            headers: HashMap::new(),
            tls_verify: true,
            expected_digest: None,
            digest_policy: DigestPolicy::WholeOnly,
            overwrite: false,
            progress_interval: cfg.progress_interval(),
        }
    }

    /// Drops any caller header that collides with a name this engine
    /// manages itself, so a misbehaving caller can't override `Range`.
    pub fn sanitized_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter(|(k, _)| !RESERVED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn segment_digest_algorithm(&self) -> Option<Algorithm> {
        match self.digest_policy {
            DigestPolicy::WholeOnly => None,
            DigestPolicy::PerSegmentAndWhole => self.expected_digest.as_ref().map(|d| d.algorithm),
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from_config(&DlxConfig::default())
    }
}
