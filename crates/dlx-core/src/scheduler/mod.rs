//! Worker Pool / Scheduler: bounded-concurrency segment dispatch, shared
//! connection budgets, progress aggregation, and cancellation fan-out.
//!
//! Runs on the async control context: each segment fetch is driven by
//! `tokio::task::spawn_blocking` wrapping the blocking `curl`-based
//! `fetcher::fetch`, retried per-segment via `retry::run_with_retry`. All
//! journal mutations happen back on this control task, so commits stay
//! totally ordered: a status transition (`Pending -> InFlight`, and later
//! `-> Completed`/`Failed`) commits synchronously, and in between, progress
//! on still-in-flight segments is coalesced into periodic commits so a hard
//! kill never leaves the journal more than one coalescing window behind the
//! staging files on disk.

mod budget;
mod progress;

pub use budget::{ConnectionBudget, OriginBudgets};
pub use progress::{ProgressStats, ProgressThrottle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::digest::{Algorithm, Hasher};
use crate::error::{DlxError, Result};
use crate::fetcher::{self, FetchOutcome, FetchTransportOptions};
use crate::journal::{Journal, JournalStore, SegmentStatus};
use crate::plan::Segment;
use crate::retry::{self, FetchError, RetryPolicy};
use crate::staging::StagingLayout;

/// Bytes of fresh progress on one segment that justify a journal commit
/// even before the coalescing time window elapses.
const COALESCE_BYTE_THRESHOLD: u64 = 512 * 1024;

#[derive(Clone, Copy)]
pub struct SchedulerOptions {
    pub max_parallelism: usize,
    pub retry_policy: RetryPolicy,
    pub progress_interval: Duration,
    pub segment_digest_algorithm: Option<Algorithm>,
    pub transport: FetchTransportOptions,
}

type FetchTaskResult = (usize, std::result::Result<Option<String>, FetchError>);

/// Runs every non-completed segment in `journal` to completion, failure, or
/// cancellation. Returns `Ok(())` once every segment reaches `Completed`.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(segments = journal.segments.len()))]
pub async fn run(
    url: &str,
    custom_headers: HashMap<String, String>,
    staging: Arc<StagingLayout>,
    journal_store: &mut JournalStore,
    journal: &mut Journal,
    origin_budgets: Arc<OriginBudgets>,
    origin: String,
    opts: SchedulerOptions,
    cancel: Arc<AtomicBool>,
    progress_tx: Option<tokio::sync::mpsc::Sender<ProgressStats>>,
) -> Result<()> {
    let total_bytes: u64 = journal.segments.iter().map(|s| s.end - s.start).sum();
    let started_at = Instant::now();
    let mut throttle = ProgressThrottle::new(opts.progress_interval);

    let pending: Vec<usize> = journal
        .segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status != SegmentStatus::Completed)
        .map(|(i, _)| i)
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    let progress_counters: HashMap<usize, Arc<AtomicU64>> = pending
        .iter()
        .map(|&i| (i, Arc::new(AtomicU64::new(journal.segments[i].bytes_written))))
        .collect();
    let mut last_committed: HashMap<usize, u64> =
        pending.iter().map(|&i| (i, journal.segments[i].bytes_written)).collect();

    let mut cursor = 0usize;
    let mut join_set: tokio::task::JoinSet<FetchTaskResult> = tokio::task::JoinSet::new();
    let mut first_permanent_error: Option<DlxError> = None;

    let mut coalesce_tick = tokio::time::interval(Duration::from_millis(250));
    coalesce_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        while first_permanent_error.is_none()
            && !cancel.load(Ordering::Relaxed)
            && join_set.len() < opts.max_parallelism
            && cursor < pending.len()
        {
            let Some(reservation) = origin_budgets.try_reserve_one(&origin) else {
                break;
            };
            let index = pending[cursor];
            cursor += 1;

            // Committed synchronously before the fetch starts: a crash right
            // after this point still finds the segment `InFlight`, not a
            // stale `Pending` that disagrees with a staging file already
            // growing from the blocking fetch task.
            journal_store.update_segment(journal, index, |seg| {
                seg.status = SegmentStatus::InFlight;
            })?;
            tracing::debug!(segment = index, "dispatching segment");

            let url = url.to_string();
            let custom_headers = custom_headers.clone();
            let journal_segment = &journal.segments[index];
            let segment = Segment { start: journal_segment.start, end: journal_segment.end };
            let validator = journal.remote.validator.clone();
            let staging = Arc::clone(&staging);
            let cancel = Arc::clone(&cancel);
            let counter = Arc::clone(&progress_counters[&index]);
            let retry_policy = opts.retry_policy;
            let digest_algorithm = opts.segment_digest_algorithm;
            let transport = opts.transport;

            join_set.spawn_blocking(move || {
                let _reservation = reservation;
                let file = match staging.open_segment_file(index) {
                    Ok(f) => f,
                    Err(e) => return (index, Err(FetchError::Storage(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))),
                };

                let mut final_digest: Option<String> = None;
                let result = retry::run_with_retry(&retry_policy, |_attempt| {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(FetchError::Cancelled);
                    }
                    let bytes_written_before = counter.load(Ordering::Relaxed);
                    let hasher = digest_algorithm.map(Hasher::new);
                    match fetcher::fetch(
                        index,
                        &url,
                        &custom_headers,
                        &segment,
                        bytes_written_before,
                        &file,
                        &validator,
                        Arc::clone(&cancel),
                        Arc::clone(&counter),
                        hasher,
                        transport,
                    ) {
                        Ok(FetchOutcome::Completed { digest }) => {
                            final_digest = digest;
                            Ok(())
                        }
                        Ok(FetchOutcome::Cancelled) => Err(FetchError::Cancelled),
                        Err(e) => Err(e),
                    }
                });

                (index, result.map(|()| final_digest))
            });
        }

        if join_set.is_empty() {
            if cursor >= pending.len() {
                break;
            }
            if cancel.load(Ordering::Relaxed) {
                return Err(DlxError::Cancelled);
            }
            if let Some(e) = first_permanent_error {
                return Err(e);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        tokio::select! {
            biased;
            joined = join_set.join_next() => {
                let Some(joined) = joined else {
                    continue;
                };
                let (index, outcome) = joined.map_err(|e| DlxError::InternalInvariant(format!("fetch task join: {e}")))?;

                match outcome {
                    Ok(digest) => {
                        journal_store.update_segment(journal, index, |seg| {
                            seg.status = SegmentStatus::Completed;
                            seg.bytes_written = seg.end - seg.start;
                            seg.digest = digest;
                        })?;
                        last_committed.insert(index, journal.segments[index].bytes_written);
                        tracing::debug!(segment = index, "segment completed");
                    }
                    Err(FetchError::Cancelled) => {
                        // Partial bytes already on disk are kept; the segment is left
                        // `InFlight` rather than `Completed` so a restart demotes it
                        // to `Pending` instead of trusting a half-written range.
                        let bytes_written = progress_counters[&index].load(Ordering::Relaxed);
                        journal_store.update_segment(journal, index, |seg| {
                            seg.status = SegmentStatus::InFlight;
                            seg.bytes_written = bytes_written;
                        })?;
                        last_committed.insert(index, bytes_written);
                    }
                    Err(e) => {
                        // `run_with_retry` already exhausted the policy's attempts
                        // internally, so any error reaching here is final for this
                        // segment: cancel siblings rather than let them run to no
                        // useful end.
                        let bytes_written = progress_counters[&index].load(Ordering::Relaxed);
                        journal_store.update_segment(journal, index, |seg| {
                            seg.status = SegmentStatus::Failed;
                            seg.bytes_written = bytes_written;
                            seg.attempts += 1;
                        })?;
                        last_committed.insert(index, bytes_written);
                        cancel.store(true, Ordering::Relaxed);
                        if first_permanent_error.is_none() {
                            tracing::warn!(segment = index, "segment failed permanently, cancelling siblings");
                            first_permanent_error = Some(fetch_error_to_dlx(e, index));
                        }
                    }
                }
            }
            _ = coalesce_tick.tick() => {
                maybe_commit_progress(journal_store, journal, &progress_counters, &mut last_committed)?;
            }
        }

        if throttle.should_emit() {
            if let Some(ref tx) = progress_tx {
                let bytes_done: u64 = journal
                    .segments
                    .iter()
                    .enumerate()
                    .map(|(i, seg)| {
                        if seg.status == SegmentStatus::Completed {
                            seg.end - seg.start
                        } else {
                            progress_counters.get(&i).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
                        }
                    })
                    .sum();
                let segments_done = journal.segments.iter().filter(|s| s.status == SegmentStatus::Completed).count();
                let _ = tx
                    .send(ProgressStats {
                        bytes_done: bytes_done.min(total_bytes),
                        total_bytes,
                        elapsed_secs: started_at.elapsed().as_secs_f64(),
                        segments_done,
                        segment_count: journal.segments.len(),
                    })
                    .await;
            }
        }
    }

    if let Some(e) = first_permanent_error {
        return Err(e);
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(DlxError::Cancelled);
    }
    if journal.segments.iter().all(|s| s.status == SegmentStatus::Completed) {
        tracing::info!("all segments completed");
        Ok(())
    } else {
        Err(DlxError::InternalInvariant("scheduler exited with incomplete segments".into()))
    }
}

/// Commits the current byte counters of every `InFlight` segment into
/// `journal` when either the time-coalescing window has elapsed or any
/// segment has advanced by at least [`COALESCE_BYTE_THRESHOLD`] bytes since
/// its last commit. A single commit covers every segment due at once.
fn maybe_commit_progress(
    journal_store: &mut JournalStore,
    journal: &mut Journal,
    progress_counters: &HashMap<usize, Arc<AtomicU64>>,
    last_committed: &mut HashMap<usize, u64>,
) -> Result<()> {
    let time_due = journal_store.should_coalesce_commit();
    let mut dirty = false;
    for (&index, counter) in progress_counters {
        if journal.segments[index].status != SegmentStatus::InFlight {
            continue;
        }
        let current = counter.load(Ordering::Relaxed);
        let prev = *last_committed.get(&index).unwrap_or(&0);
        if current == prev {
            continue;
        }
        if time_due || current.saturating_sub(prev) >= COALESCE_BYTE_THRESHOLD {
            journal.segments[index].bytes_written = current;
            last_committed.insert(index, current);
            dirty = true;
        }
    }
    if dirty {
        journal_store.commit(journal)?;
    }
    Ok(())
}

fn fetch_error_to_dlx(e: FetchError, index: usize) -> DlxError {
    match e {
        FetchError::Http(412) => DlxError::SourceChanged { detail: "412 on segment fetch".into() },
        FetchError::Http(401) => DlxError::AuthRequired,
        FetchError::Http(403) => DlxError::Forbidden,
        FetchError::Http(404) => DlxError::NotFound,
        FetchError::Http(code) => DlxError::Unreachable(format!("HTTP {code}")),
        FetchError::Curl(ce) => DlxError::Unreachable(ce.to_string()),
        FetchError::PartialTransfer { expected, received } => {
            DlxError::StagingInconsistent { index, detail: format!("expected {expected} bytes, got {received}") }
        }
        FetchError::StagingInconsistent { detail, .. } => DlxError::StagingInconsistent { index, detail },
        FetchError::Storage(io) => DlxError::Io(io),
        FetchError::Cancelled => DlxError::Cancelled,
    }
}
