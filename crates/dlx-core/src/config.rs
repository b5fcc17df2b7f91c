//! Global defaults for every tunable in the options enumeration.
//!
//! Loaded from `~/.config/dlx/config.toml` via the `xdg` crate, the same way
//! a host application's own `config.toml` would be loaded. Per-call
//! `DownloadOptions` (see `coordinator::options`) override these defaults;
//! this is only the process-wide baseline.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide defaults. Every field here has a matching per-job override
/// in `coordinator::DownloadOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlxConfig {
    /// Segments to split into when range support and size are known.
    pub max_parallelism: usize,
    /// Target bytes per segment before clamping to `max_parallelism`.
    pub target_segment_size: u64,
    /// Attempts per segment before it is marked `failed` (first attempt counts as 1).
    pub max_attempts: u32,
    /// Connect timeout, seconds.
    pub connect_timeout_secs: u64,
    /// Idle-read timeout, seconds.
    pub idle_timeout_secs: u64,
    /// Minimum interval between progress callbacks, milliseconds.
    pub progress_interval_ms: u64,
    /// Maximum total concurrent connections across all jobs.
    pub max_total_connections: usize,
    /// Maximum concurrent connections per origin (host).
    pub max_connections_per_host: usize,
}

impl Default for DlxConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            target_segment_size: 8 * 1024 * 1024,
            max_attempts: 5,
            connect_timeout_secs: 10,
            idle_timeout_secs: 30,
            progress_interval_ms: 250,
            max_total_connections: 64,
            max_connections_per_host: 8,
        }
    }
}

impl DlxConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlx")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists yet.
pub fn load_or_init() -> Result<DlxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DlxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DlxConfig = toml::from_str(&data)?;
    Ok(cfg)
}
