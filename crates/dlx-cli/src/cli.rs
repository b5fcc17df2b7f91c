//! CLI for the dlx resumable download engine.
//!
//! Thin wrapper over `dlx_core`: each invocation drives a single
//! `DownloadJob` directly through `Coordinator`, with no persistent
//! cross-process job database.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use dlx_core::digest::{self, Algorithm};
use dlx_core::journal::JournalStore;
use dlx_core::staging::StagingLayout;
use dlx_core::{config, Coordinator, DownloadOptions, Outcome};

#[derive(Debug, Parser)]
#[command(name = "dlx")]
#[command(about = "dlx: resumable multipart download engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download a URL, optionally to a given output path.
    Get {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Output file path (default: derived from the URL or Content-Disposition).
        output: Option<PathBuf>,
        /// Overwrite an existing file at the output path.
        #[arg(long)]
        overwrite: bool,
    },

    /// Resume a job from its staging directory (the `.<name>.download` directory next to the output).
    Resume {
        /// Path to the staging directory left behind by an interrupted `get`.
        staging_dir: PathBuf,
    },

    /// Verify a file's digest.
    Verify {
        /// Path to the file to check.
        path: PathBuf,
        /// Digest algorithm: md5, sha1, sha256, or sha512.
        algorithm: String,
        /// Expected digest, hex-encoded.
        digest: String,
    },
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            Command::Get { url, output, overwrite } => {
                let mut options = DownloadOptions::from_config(&cfg);
                options.overwrite = overwrite;
                run_get(&cfg, url, output, options).await
            }
            Command::Resume { staging_dir } => run_resume(&cfg, &staging_dir).await,
            Command::Verify { path, algorithm, digest } => run_verify(&path, &algorithm, &digest),
        }
    }
}

async fn run_get(
    cfg: &config::DlxConfig,
    url: String,
    output: Option<PathBuf>,
    options: DownloadOptions,
) -> Result<()> {
    let coordinator = Coordinator::new(cfg.max_total_connections, cfg.max_connections_per_host);
    let handle = coordinator
        .submit(url, output, options)
        .map_err(|e| anyhow!("{e}"))?;

    let started_at = Instant::now();
    let outcome = loop {
        if let Some(stats) = handle.progress() {
            print_progress(&stats, started_at);
        }
        if handle.state() == dlx_core::JobState::Published
            || handle.state() == dlx_core::JobState::Failed
            || handle.state() == dlx_core::JobState::Cancelled
        {
            break handle.wait().await.map_err(|e| anyhow!("{e}"))?;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    };

    match outcome {
        Outcome::Published(published) => {
            println!();
            println!("saved {} ({} bytes)", published.path.display(), published.bytes);
            Ok(())
        }
        Outcome::Cancelled => Err(anyhow!("download cancelled")),
    }
}

async fn run_resume(cfg: &config::DlxConfig, staging_dir: &Path) -> Result<()> {
    let final_path = StagingLayout::final_path_for(staging_dir)
        .ok_or_else(|| anyhow!("{} doesn't look like a dlx staging directory", staging_dir.display()))?;
    let journal = JournalStore::new(staging_dir)
        .load()
        .context("reading journal")?
        .ok_or_else(|| anyhow!("no journal found in {}", staging_dir.display()))?;

    let options = DownloadOptions::from_config(cfg);
    run_get(cfg, journal.url, Some(final_path), options).await
}

fn run_verify(path: &Path, algorithm: &str, expected: &str) -> Result<()> {
    let algorithm = parse_algorithm(algorithm)?;
    digest::verify_path(path, algorithm, expected).map_err(|e| anyhow!("{e}"))?;
    println!("OK  {}", path.display());
    Ok(())
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name.to_ascii_lowercase().as_str() {
        "md5" => Ok(Algorithm::Md5),
        "sha1" => Ok(Algorithm::Sha1),
        "sha256" => Ok(Algorithm::Sha256),
        "sha512" => Ok(Algorithm::Sha512),
        other => Err(anyhow!("unsupported digest algorithm: {other}")),
    }
}

fn print_progress(stats: &dlx_core::scheduler::ProgressStats, started_at: Instant) {
    let done_mib = stats.bytes_done as f64 / 1_048_576.0;
    let total_mib = stats.total_bytes as f64 / 1_048_576.0;
    let pct = stats.fraction() * 100.0;
    let rate_mib = stats.bytes_per_sec() / 1_048_576.0;
    let eta = stats.eta_secs().map(|s| format!("{s:.0}s")).unwrap_or_else(|| "?".to_string());
    let elapsed = started_at.elapsed().as_secs();
    print!(
        "\r  {done_mib:.1} / {total_mib:.1} MiB ({pct:.1}%)  {rate_mib:.2} MiB/s  ETA {eta}  [{elapsed}s]   "
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}
