//! Journal Store: the crash-safe on-disk record of a job's plan and
//! per-segment progress.
//!
//! A journal is a single JSON file in the staging directory, durably
//! replaced by writing `journal.tmp` then renaming over `journal` — the
//! same temp-file-then-rename sequence the engine's file writer uses to
//! publish the final downloaded file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{DlxError, Result};
use crate::probe::{RemoteDescriptor, Validator};
use crate::staging::StagingLayout;

/// Current on-disk schema version. Bumped whenever the journal's shape
/// changes in a way that breaks forward parsing.
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalSegment {
    pub start: u64,
    pub end: u64,
    pub status: SegmentStatus,
    pub bytes_written: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ValidatorRecord {
    kind: &'static str,
    value: String,
}

impl ValidatorRecord {
    fn from_validator(v: &Validator) -> Option<Self> {
        match v {
            Validator::Strong(s) => Some(Self { kind: "strong", value: s.clone() }),
            Validator::Weak(s) => Some(Self { kind: "weak", value: s.clone() }),
            Validator::None => None,
        }
    }

    fn to_validator(record: Option<&ValidatorRecord>) -> Validator {
        match record {
            Some(r) if r.kind == "strong" => Validator::Strong(r.value.clone()),
            Some(r) if r.kind == "weak" => Validator::Weak(r.value.clone()),
            _ => Validator::None,
        }
    }
}

/// On-disk journal contents, serialized via serde_json.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalWire {
    schema_version: u32,
    url: String,
    total_len: Option<u64>,
    range_supported: bool,
    validator: Option<ValidatorRecord>,
    segments: Vec<JournalSegment>,
}

/// In-memory journal: everything the Segment Planner and Worker Pool need
/// to know about a job that may be resuming from a previous process.
#[derive(Debug, Clone)]
pub struct Journal {
    pub url: String,
    pub remote: RemoteDescriptor,
    pub range_supported: bool,
    pub segments: Vec<JournalSegment>,
}

impl Journal {
    pub fn new(url: String, remote: RemoteDescriptor, range_supported: bool, segments: Vec<JournalSegment>) -> Self {
        Self { url, remote, range_supported, segments }
    }

    fn to_wire(&self) -> JournalWire {
        JournalWire {
            schema_version: SCHEMA_VERSION,
            url: self.url.clone(),
            total_len: self.remote.total_len,
            range_supported: self.range_supported,
            validator: ValidatorRecord::from_validator(&self.remote.validator),
            segments: self.segments.clone(),
        }
    }

    fn from_wire(wire: JournalWire) -> Self {
        let validator = ValidatorRecord::to_validator(wire.validator.as_ref());
        Journal {
            url: wire.url,
            remote: RemoteDescriptor {
                total_len: wire.total_len,
                accepts_ranges: wire.range_supported,
                validator,
                content_type: None,
                content_disposition: None,
            },
            range_supported: wire.range_supported,
            segments: wire.segments,
        }
    }
}

/// Reconciles `journal`'s recorded per-segment progress against what's
/// actually on disk in `staging`, trusting the staging file length over
/// whatever the journal last had committed.
///
/// A segment recorded `Completed` whose staging file no longer matches its
/// declared length (truncated, removed, or somehow grown) is demoted to
/// `Pending`/`bytes_written: 0` rather than trusted. Every other segment has
/// its `bytes_written` set to `min(on-disk length, segment length)` — the
/// same quantity the Fetcher computes as `already_have` — so a segment left
/// mid-flight by a hard process kill (no final commit) resumes from where
/// the staging file actually ends instead of tripping the Fetcher's
/// staging-consistency check.
pub fn reconcile_with_staging(journal: &mut Journal, staging: &StagingLayout) {
    for (index, segment) in journal.segments.iter_mut().enumerate() {
        let on_disk = staging.segment_file_len(index);
        let declared = segment.end - segment.start;

        if segment.status == SegmentStatus::Completed {
            if on_disk != declared {
                tracing::warn!(segment = index, on_disk, declared, "completed segment missing or truncated on disk, demoting to pending");
                segment.status = SegmentStatus::Pending;
                segment.bytes_written = 0;
                segment.digest = None;
            }
            continue;
        }

        let effective = on_disk.min(declared);
        if segment.bytes_written != effective {
            tracing::debug!(segment = index, recorded = segment.bytes_written, on_disk = effective, "reconciling segment progress with staging file");
            segment.bytes_written = effective;
        }
    }
}

/// Load/commit interface over the journal file at `path`.
pub struct JournalStore {
    path: PathBuf,
    tmp_path: PathBuf,
    last_commit: Option<Instant>,
    coalesce_interval: Duration,
}

/// Default coalescing window for progress-only commits (segment status
/// transitions always commit immediately regardless of this window).
const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_secs(2);

impl JournalStore {
    pub fn new(staging_dir: &Path) -> Self {
        Self {
            path: staging_dir.join("journal"),
            tmp_path: staging_dir.join("journal.tmp"),
            last_commit: None,
            coalesce_interval: DEFAULT_COALESCE_INTERVAL,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the journal file. Returns `Ok(None)` if it doesn't exist yet,
    /// and a `Corrupt`-classified error (`InternalInvariant`) if it exists
    /// but fails to parse or carries an unrecognized schema version.
    pub fn load(&self) -> Result<Option<Journal>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)?;
        let wire: JournalWire = serde_json::from_str(&data)
            .map_err(|e| DlxError::Journal(format!("corrupt journal: {e}")))?;
        if wire.schema_version != SCHEMA_VERSION {
            return Err(DlxError::Journal(format!(
                "unsupported journal schema version {}",
                wire.schema_version
            )));
        }
        Ok(Some(Journal::from_wire(wire)))
    }

    /// Durably replaces the journal file: write to `journal.tmp`, then
    /// atomically rename over `journal`.
    pub fn commit(&mut self, journal: &Journal) -> Result<()> {
        let wire = journal.to_wire();
        let data = serde_json::to_string_pretty(&wire)
            .map_err(|e| DlxError::Journal(format!("failed to serialize journal: {e}")))?;
        fs::write(&self.tmp_path, data)?;
        fs::rename(&self.tmp_path, &self.path)?;
        self.last_commit = Some(Instant::now());
        Ok(())
    }

    /// Applies `mutation` to a copy of `journal`'s segment at `index` and
    /// commits the result unconditionally (used for status transitions).
    pub fn update_segment<F>(&mut self, journal: &mut Journal, index: usize, mutation: F) -> Result<()>
    where
        F: FnOnce(&mut JournalSegment),
    {
        let segment = journal
            .segments
            .get_mut(index)
            .ok_or_else(|| DlxError::InternalInvariant(format!("segment index {index} out of range")))?;
        mutation(segment);
        self.commit(journal)
    }

    /// True if enough time has passed since the last commit to justify a
    /// progress-only commit (byte-count updates that aren't status
    /// transitions). Callers should also coalesce on a byte threshold
    /// (e.g. every 512 KiB) before calling this.
    pub fn should_coalesce_commit(&self) -> bool {
        match self.last_commit {
            None => true,
            Some(t) => t.elapsed() >= self.coalesce_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Validator;

    fn sample_remote() -> RemoteDescriptor {
        RemoteDescriptor {
            total_len: Some(1000),
            accepts_ranges: true,
            validator: Validator::Strong("etag-1".into()),
            content_type: None,
            content_disposition: None,
        }
    }

    fn sample_journal() -> Journal {
        Journal::new(
            "https://example.com/file.bin".into(),
            sample_remote(),
            true,
            vec![JournalSegment {
                start: 0,
                end: 1000,
                status: SegmentStatus::Pending,
                bytes_written: 0,
                attempts: 0,
                digest: None,
            }],
        )
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn commit_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path());
        let journal = sample_journal();
        store.commit(&journal).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.url, journal.url);
        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.remote.validator, journal.remote.validator);
    }

    #[test]
    fn corrupt_journal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("journal"), b"not json").unwrap();
        let store = JournalStore::new(dir.path());
        let err = store.load().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InternalInvariant);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("journal"),
            serde_json::json!({
                "schema_version": 9999,
                "url": "https://example.com/x",
                "total_len": null,
                "range_supported": false,
                "validator": null,
                "segments": []
            })
            .to_string(),
        )
        .unwrap();
        let store = JournalStore::new(dir.path());
        assert!(store.load().is_err());
    }

    #[test]
    fn update_segment_transitions_status_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path());
        let mut journal = sample_journal();
        store.commit(&journal).unwrap();

        store
            .update_segment(&mut journal, 0, |seg| {
                seg.status = SegmentStatus::InFlight;
                seg.bytes_written = 500;
            })
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.segments[0].status, SegmentStatus::InFlight);
        assert_eq!(loaded.segments[0].bytes_written, 500);
    }

    #[test]
    fn reconcile_trusts_staging_length_for_in_flight_segment() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        let staging = StagingLayout::acquire(&final_path).unwrap();

        let mut journal = Journal::new(
            "https://example.com/file.bin".into(),
            sample_remote(),
            true,
            vec![JournalSegment {
                start: 0,
                end: 1000,
                status: SegmentStatus::InFlight,
                bytes_written: 0,
                attempts: 0,
                digest: None,
            }],
        );

        let file = staging.open_segment_file(0).unwrap();
        StagingLayout::write_segment_at(&file, 0, &vec![0u8; 400]).unwrap();
        drop(file);

        reconcile_with_staging(&mut journal, &staging);
        assert_eq!(journal.segments[0].status, SegmentStatus::InFlight);
        assert_eq!(journal.segments[0].bytes_written, 400);
    }

    #[test]
    fn reconcile_demotes_completed_segment_with_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        let staging = StagingLayout::acquire(&final_path).unwrap();

        let mut journal = Journal::new(
            "https://example.com/file.bin".into(),
            sample_remote(),
            true,
            vec![JournalSegment {
                start: 0,
                end: 1000,
                status: SegmentStatus::Completed,
                bytes_written: 1000,
                attempts: 0,
                digest: Some("deadbeef".into()),
            }],
        );

        reconcile_with_staging(&mut journal, &staging);
        assert_eq!(journal.segments[0].status, SegmentStatus::Pending);
        assert_eq!(journal.segments[0].bytes_written, 0);
        assert!(journal.segments[0].digest.is_none());
    }
}
