//! Assembler: concatenates completed segment files into the final output
//! and publishes it with an atomic rename, mirroring the temp-file-then-
//! rename discipline the storage writer uses for a single whole file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::digest::{self, Algorithm};
use crate::error::{DlxError, Result};
use crate::journal::{Journal, SegmentStatus};
use crate::staging::StagingLayout;

/// Outcome of a successful assembly.
#[derive(Debug, Clone)]
pub struct Published {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Caller-supplied whole-file integrity check, verified against the
/// concatenated `.part` file before it is renamed into place.
#[derive(Debug, Clone)]
pub struct ExpectedDigest {
    pub algorithm: Algorithm,
    pub value: String,
}

/// Verifies every segment is `completed` with a staging file of the right
/// length, concatenates them in index order into `final_path.part`,
/// optionally verifies a whole-file digest, then renames `.part` over
/// `final_path` and removes the staging directory.
///
/// On any failure the staging directory (and any `.part` file) is left in
/// place for diagnostics or a future restart; only a clean `Published`
/// result consumes `staging`.
#[tracing::instrument(skip_all, fields(final_path = %final_path.display(), segments = journal.segments.len()))]
pub fn assemble(
    journal: &Journal,
    staging: StagingLayout,
    final_path: &Path,
    overwrite: bool,
    expected_digest: Option<&ExpectedDigest>,
) -> Result<Published> {
    if final_path.exists() && !overwrite {
        return Err(DlxError::Busy(final_path.to_path_buf()));
    }

    for (index, seg) in journal.segments.iter().enumerate() {
        if seg.status != SegmentStatus::Completed {
            return Err(DlxError::StagingInconsistent {
                index,
                detail: format!("segment not completed: {:?}", seg.status),
            });
        }
        let declared = seg.end - seg.start;
        let on_disk = staging.segment_file_len(index);
        if on_disk != declared {
            return Err(DlxError::StagingInconsistent {
                index,
                detail: format!("staging file has {on_disk} bytes, segment declares {declared}"),
            });
        }
    }

    let part_path = part_path_for(final_path);
    let total_bytes = concatenate_segments(journal, &staging, &part_path)?;

    if let Some(expected) = expected_digest {
        let actual = digest::digest_path(&part_path, expected.algorithm)?;
        if !actual.eq_ignore_ascii_case(&expected.value) {
            return Err(DlxError::IntegrityMismatch {
                expected: expected.value.clone(),
                actual,
            });
        }
    }

    fs::rename(&part_path, final_path)?;
    staging.remove()?;

    tracing::info!(bytes = total_bytes, "assembled and published final file");
    Ok(Published { path: final_path.to_path_buf(), bytes: total_bytes })
}

fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    final_path.with_file_name(name)
}

fn concatenate_segments(journal: &Journal, staging: &StagingLayout, part_path: &Path) -> Result<u64> {
    let mut out = File::create(part_path)?;
    let mut total = 0u64;
    for index in 0..journal.segments.len() {
        let seg_path = staging.segment_path(index);
        let mut seg_file = File::open(&seg_path)?;
        total += io::copy(&mut seg_file, &mut out)?;
    }
    out.flush()?;
    out.sync_all()?;
    Ok(total)
}
