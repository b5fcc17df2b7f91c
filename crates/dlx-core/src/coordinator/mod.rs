//! Job Coordinator: owns the `created -> ... -> published|failed|cancelled`
//! state machine and is the only component that mutates a job's lifecycle
//! state, the way a `ResumeDb` job-state table owns a job's transitions
//! while delegating the actual I/O to the fetcher and staging layer.

mod options;

pub use options::{DigestPolicy, DownloadOptions, ExpectedDigest};

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::assembler::{self, Published};
use crate::error::{DlxError, Result};
use crate::journal::{self, Journal, JournalSegment, JournalStore, SegmentStatus};
use crate::plan::{self, PlanOptions};
use crate::probe::{self, ProbeOptions};
use crate::retry::RetryPolicy;
use crate::scheduler::{self, OriginBudgets, ProgressStats, SchedulerOptions};
use crate::staging::StagingLayout;
use crate::url_model;

/// Lifecycle state of one job. Only the Coordinator mutates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Probing,
    Planning,
    Downloading,
    Assembling,
    Published,
    Failed,
    Cancelled,
}

/// Snapshot description of a submitted job; immutable after `submit`.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub final_path: PathBuf,
    pub options: DownloadOptions,
}

/// Terminal result delivered by [`JobHandle::wait`].
#[derive(Debug, Clone)]
pub enum Outcome {
    Published(Published),
    Cancelled,
}

/// Handle to a submitted, running (or finished) job.
pub struct JobHandle {
    state: Arc<Mutex<JobState>>,
    progress_rx: watch::Receiver<Option<ProgressStats>>,
    cancel: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<Result<Outcome>>,
    live_guard: Option<LiveGuard>,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    /// Latest progress snapshot, if at least one has been emitted yet.
    pub fn progress(&self) -> Option<ProgressStats> {
        self.progress_rx.borrow().clone()
    }

    /// Requests cancellation; in-flight fetchers stop at the next
    /// write-chunk boundary and the job eventually settles into `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Awaits the terminal outcome.
    pub async fn wait(self) -> Result<Outcome> {
        let result = self
            .task
            .await
            .map_err(|e| DlxError::InternalInvariant(format!("job task join: {e}")))?;
        drop(self.live_guard);
        result
    }
}

/// Removes a final path from the coordinator's live-job set on drop,
/// regardless of how the job ended.
struct LiveGuard {
    live: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.lock().unwrap().remove(&self.path);
    }
}

/// Entry point for starting and tracking download jobs. Holds the
/// process-wide origin-keyed connection budget shared across every job it
/// submits, resolving the shared-connection-pool open question.
pub struct Coordinator {
    origin_budgets: Arc<OriginBudgets>,
    live: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Coordinator {
    pub fn new(max_total_connections: usize, max_connections_per_host: usize) -> Self {
        Self {
            origin_budgets: Arc::new(OriginBudgets::new(max_total_connections, max_connections_per_host)),
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Submits a download. `final_path` may be `None`, in which case the
    /// output filename is derived from the URL path or a `Content-Disposition`
    /// header once the probe completes. Rejects with `Busy` immediately when
    /// `final_path` is supplied and a job against that same path is already
    /// live; when it's derived after probing, the staging directory's
    /// advisory lock is the backstop that catches the collision instead.
    pub fn submit(&self, url: String, final_path: Option<PathBuf>, options: DownloadOptions) -> Result<JobHandle> {
        let live_guard = if let Some(path) = &final_path {
            let mut live = self.live.lock().unwrap();
            if !live.insert(path.clone()) {
                return Err(DlxError::Busy(path.clone()));
            }
            drop(live);
            Some(LiveGuard { live: Arc::clone(&self.live), path: path.clone() })
        } else {
            None
        };

        let state = Arc::new(Mutex::new(JobState::Created));
        let cancel = Arc::new(AtomicBool::new(false));
        let (progress_tx, progress_rx) = watch::channel(None);
        let origin_budgets = Arc::clone(&self.origin_budgets);

        let task_state = Arc::clone(&state);
        let task_cancel = Arc::clone(&cancel);
        let task = tokio::spawn(run_job(
            url,
            final_path,
            options,
            task_state,
            task_cancel,
            origin_budgets,
            progress_tx,
        ));

        Ok(JobHandle { state, progress_rx, cancel, task, live_guard })
    }
}

fn set_state(state: &Arc<Mutex<JobState>>, next: JobState) {
    *state.lock().unwrap() = next;
}

#[tracing::instrument(skip_all, fields(url = %url))]
async fn run_job(
    url: String,
    final_path: Option<PathBuf>,
    options: DownloadOptions,
    state: Arc<Mutex<JobState>>,
    cancel: Arc<AtomicBool>,
    origin_budgets: Arc<OriginBudgets>,
    progress_tx: watch::Sender<Option<ProgressStats>>,
) -> Result<Outcome> {
    set_state(&state, JobState::Probing);
    let headers = options.sanitized_headers();
    let probe_opts = ProbeOptions {
        connect_timeout: options.connect_timeout,
        timeout: options.idle_timeout,
        tls_verify: options.tls_verify,
    };

    let remote = {
        let url = url.clone();
        let headers = headers.clone();
        tokio::task::spawn_blocking(move || probe::probe(&url, &headers, &probe_opts))
            .await
            .map_err(|e| DlxError::InternalInvariant(format!("probe task join: {e}")))?
    };
    let remote = match remote {
        Ok(r) => r,
        Err(e) => {
            set_state(&state, JobState::Failed);
            return Err(e);
        }
    };

    let final_path = final_path.unwrap_or_else(|| {
        let name = url_model::derive_filename(&url, remote.content_disposition.as_deref());
        PathBuf::from(name)
    });

    set_state(&state, JobState::Planning);
    let staging = match StagingLayout::acquire(&final_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            set_state(&state, JobState::Failed);
            return Err(e);
        }
    };

    // `staging` moves in whole: `run_planned` hands its one remaining Arc
    // clone to the scheduler and regains sole ownership once it returns,
    // which is what lets it reclaim the `StagingLayout` for assembly.
    let result = run_planned(
        &url,
        &headers,
        &options,
        &remote,
        staging,
        &final_path,
        &state,
        Arc::clone(&cancel),
        origin_budgets,
        progress_tx,
    )
    .await;

    match result {
        Ok(Outcome::Published(published)) => {
            tracing::info!(path = %published.path.display(), bytes = published.bytes, "job published");
            set_state(&state, JobState::Published);
            Ok(Outcome::Published(published))
        }
        Ok(Outcome::Cancelled) => {
            tracing::info!("job cancelled");
            set_state(&state, JobState::Cancelled);
            Ok(Outcome::Cancelled)
        }
        Err(e) => {
            tracing::warn!(error = %e, "job failed");
            set_state(&state, JobState::Failed);
            Err(e)
        }
    }
}

/// Plans, journals, downloads, and (on success) assembles and publishes.
/// Staging is reclaimed from its `Arc` once the scheduler's clone drops, so
/// ownership is available for `assembler::assemble` without a second job
/// racing the same `StagingLayout`.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(url = %url, final_path = %final_path.display()))]
async fn run_planned(
    url: &str,
    headers: &std::collections::HashMap<String, String>,
    options: &DownloadOptions,
    remote: &crate::probe::RemoteDescriptor,
    staging: Arc<StagingLayout>,
    final_path: &std::path::Path,
    state: &Arc<Mutex<JobState>>,
    cancel: Arc<AtomicBool>,
    origin_budgets: Arc<OriginBudgets>,
    progress_tx: watch::Sender<Option<ProgressStats>>,
) -> Result<Outcome> {
    let journal_store_path = staging.dir().to_path_buf();
    let mut journal_store = JournalStore::new(&journal_store_path);
    let existing = journal_store.load()?;

    let restart_from_empty = matches!(&existing, Some(j) if remote.conflicts_with(&j.remote));
    if restart_from_empty {
        if let Some(j) = &existing {
            for index in 0..j.segments.len() {
                let _ = fs::remove_file(staging.segment_path(index));
            }
        }
    }

    let plan_opts = PlanOptions {
        target_segment_size: options.target_segment_size,
        max_parallelism: options.max_parallelism,
    };
    let reuse_journal = if restart_from_empty { None } else { existing.as_ref() };
    let segment_plan = plan::plan(remote, plan_opts, reuse_journal);

    let mut journal = match (restart_from_empty, existing) {
        (false, Some(j)) => j,
        _ => Journal::new(
            url.to_string(),
            remote.clone(),
            segment_plan.range_supported,
            segment_plan
                .segments
                .iter()
                .map(|s| JournalSegment {
                    start: s.start,
                    end: s.end,
                    status: SegmentStatus::Pending,
                    bytes_written: 0,
                    attempts: 0,
                    digest: None,
                })
                .collect(),
        ),
    };
    // Trust the staging files over whatever the journal last committed: a
    // hard kill between two commits leaves the journal behind the disk, and
    // `fetcher::fetch`'s consistency check would otherwise fail the whole
    // job rather than resume it.
    journal::reconcile_with_staging(&mut journal, &staging);
    journal_store.commit(&journal)?;

    set_state(state, JobState::Downloading);
    let origin = url_model::origin_key(url).unwrap_or_else(|| url.to_string());
    let retry_policy = RetryPolicy {
        max_attempts: options.max_attempts,
        ..RetryPolicy::default()
    };
    let scheduler_opts = SchedulerOptions {
        max_parallelism: options.max_parallelism,
        retry_policy,
        progress_interval: options.progress_interval,
        segment_digest_algorithm: options.segment_digest_algorithm(),
        transport: crate::fetcher::FetchTransportOptions {
            connect_timeout: options.connect_timeout,
            idle_timeout: options.idle_timeout,
            tls_verify: options.tls_verify,
        },
    };

    let (mpsc_tx, mut mpsc_rx) = tokio::sync::mpsc::channel::<ProgressStats>(8);
    let forward_task = tokio::spawn(async move {
        while let Some(stats) = mpsc_rx.recv().await {
            let _ = progress_tx.send(Some(stats));
        }
    });

    let run_result = scheduler::run(
        url,
        headers.clone(),
        Arc::clone(&staging),
        &mut journal_store,
        &mut journal,
        origin_budgets,
        origin,
        scheduler_opts,
        Arc::clone(&cancel),
        Some(mpsc_tx),
    )
    .await;
    drop(forward_task);

    match run_result {
        Ok(()) => {
            set_state(state, JobState::Assembling);
            let staging = Arc::try_unwrap(staging).map_err(|_| {
                DlxError::InternalInvariant("staging still shared after scheduler completed".into())
            })?;
            let published = assembler::assemble(
                &journal,
                staging,
                final_path,
                options.overwrite,
                options.expected_digest.as_ref(),
            )?;
            Ok(Outcome::Published(published))
        }
        Err(DlxError::Cancelled) => Ok(Outcome::Cancelled),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_rejects_duplicate_live_path() {
        let coordinator = Coordinator::new(16, 8);
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");

        let handle = coordinator
            .submit(
                "https://example.invalid/unused".into(),
                Some(final_path.clone()),
                DownloadOptions::default(),
            )
            .unwrap();

        let second = coordinator.submit(
            "https://example.invalid/unused".into(),
            Some(final_path.clone()),
            DownloadOptions::default(),
        );
        assert!(matches!(second.unwrap_err().kind(), crate::error::ErrorKind::Busy));

        handle.cancel();
        let _ = handle.wait().await;
    }
}
