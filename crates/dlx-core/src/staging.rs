//! On-disk staging layout: one directory per job, holding per-segment
//! files, the journal, and an advisory lock.
//!
//! Layout, adjacent to the final output path `/d/file.bin`:
//!
//! ```text
//! /d/.file.bin.download/
//!     seg.0000, seg.0001, ...   raw segment bytes, no headers
//!     journal, journal.tmp      current journal and commit scratch
//!     lock                      advisory lock file
//! ```
#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::{DlxError, Result};

const STAGING_PREFIX: &str = ".";
const STAGING_SUFFIX: &str = ".download";

/// Owns the staging directory for one job. Held for the lifetime of the
/// job; `lock` is released (and the lock file removed) when dropped.
pub struct StagingLayout {
    dir: PathBuf,
    lock_file: Option<File>,
}

impl StagingLayout {
    /// Deterministic staging directory path for a given final output path.
    pub fn dir_for(final_path: &Path) -> PathBuf {
        let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
        let basename = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        parent.join(format!("{STAGING_PREFIX}{basename}{STAGING_SUFFIX}"))
    }

    /// Recovers the final output path from a staging directory, the inverse
    /// of [`Self::dir_for`]. Returns `None` if `staging_dir`'s basename
    /// doesn't carry the expected dotted prefix/suffix.
    pub fn final_path_for(staging_dir: &Path) -> Option<PathBuf> {
        let basename = staging_dir.file_name()?.to_str()?;
        let stripped = basename.strip_prefix(STAGING_PREFIX)?.strip_suffix(STAGING_SUFFIX)?;
        if stripped.is_empty() {
            return None;
        }
        let parent = staging_dir.parent().unwrap_or_else(|| Path::new("."));
        Some(parent.join(stripped))
    }

    /// Creates (if needed) and locks the staging directory for `final_path`.
    /// Fails with `Busy` if another live job already holds the lock.
    pub fn acquire(final_path: &Path) -> Result<Self> {
        let dir = Self::dir_for(final_path);
        fs::create_dir_all(&dir)?;

        let lock_path = dir.join("lock");
        let lock_file = Self::try_lock(&lock_path)?;

        Ok(Self { dir, lock_file: Some(lock_file) })
    }

    #[cfg(unix)]
    fn try_lock(lock_path: &Path) -> Result<File> {
        let file = File::options()
            .create(true)
            .write(true)
            .open(lock_path)?;
        let fd = file.as_raw_fd();
        let r = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if r != 0 {
            return Err(DlxError::Busy(lock_path.to_path_buf()));
        }
        Ok(file)
    }

    #[cfg(not(unix))]
    fn try_lock(lock_path: &Path) -> Result<File> {
        if lock_path.exists() {
            return Err(DlxError::Busy(lock_path.to_path_buf()));
        }
        Ok(File::options().create(true).write(true).open(lock_path)?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join("journal")
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("seg.{index:04}"))
    }

    /// Opens (creating if missing) the staging file for `index`. Segment
    /// files grow by append rather than being preallocated: their on-disk
    /// length at any point is exactly the segment's `bytes_written`, which
    /// is what lets the Fetcher detect a torn staging file by comparing
    /// length against the journal's recorded progress.
    pub fn open_segment_file(&self, index: usize) -> Result<File> {
        let path = self.segment_path(index);
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(file)
    }

    /// Current on-disk length of a segment's staging file, or 0 if missing.
    pub fn segment_file_len(&self, index: usize) -> u64 {
        fs::metadata(self.segment_path(index)).map(|m| m.len()).unwrap_or(0)
    }

    /// Writes `data` at byte `offset` within the segment's staging file.
    #[cfg(unix)]
    pub fn write_segment_at(file: &File, offset: u64, data: &[u8]) -> Result<()> {
        file.write_at(data, offset)?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn write_segment_at(file: &File, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = file.try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// Removes the entire staging directory, including the journal, lock,
    /// and every segment file. Called after successful assembly.
    pub fn remove(self) -> Result<()> {
        drop(self.lock_file);
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Releases the advisory lock without deleting staging contents,
    /// leaving the directory intact for a future resume attempt.
    pub fn release(mut self) {
        self.lock_file.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_for_uses_dotted_prefix_and_suffix() {
        let p = StagingLayout::dir_for(Path::new("/d/file.bin"));
        assert_eq!(p, PathBuf::from("/d/.file.bin.download"));
    }

    #[test]
    fn acquire_creates_directory_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("archive.iso");
        let staging = StagingLayout::acquire(&final_path).unwrap();
        assert!(staging.dir().exists());
        assert!(staging.dir().join("lock").exists());
    }

    #[test]
    fn second_acquire_on_live_staging_fails_busy() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("archive.iso");
        let _first = StagingLayout::acquire(&final_path).unwrap();
        let second = StagingLayout::acquire(&final_path);
        assert!(matches!(second.unwrap_err().kind(), crate::error::ErrorKind::Busy));
    }

    #[test]
    fn acquire_after_release_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("archive.iso");
        let first = StagingLayout::acquire(&final_path).unwrap();
        first.release();
        let second = StagingLayout::acquire(&final_path);
        assert!(second.is_ok());
    }

    #[test]
    fn segment_paths_are_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        let staging = StagingLayout::acquire(&final_path).unwrap();
        assert_eq!(
            staging.segment_path(3).file_name().unwrap().to_str().unwrap(),
            "seg.0003"
        );
    }

    #[test]
    fn open_segment_file_starts_empty_and_grows_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        let staging = StagingLayout::acquire(&final_path).unwrap();
        let file = staging.open_segment_file(0).unwrap();
        assert_eq!(staging.segment_file_len(0), 0);
        StagingLayout::write_segment_at(&file, 0, b"hello").unwrap();
        assert_eq!(staging.segment_file_len(0), 5);
    }

    #[test]
    fn final_path_for_reverses_dir_for() {
        let final_path = Path::new("/d/archive.iso");
        let staging_dir = StagingLayout::dir_for(final_path);
        assert_eq!(StagingLayout::final_path_for(&staging_dir).unwrap(), final_path);
    }

    #[test]
    fn final_path_for_rejects_unrelated_directory() {
        assert!(StagingLayout::final_path_for(Path::new("/d/plain-dir")).is_none());
    }

    #[test]
    fn write_segment_at_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("f.bin");
        let staging = StagingLayout::acquire(&final_path).unwrap();
        let file = staging.open_segment_file(0).unwrap();
        StagingLayout::write_segment_at(&file, 0, b"hello").unwrap();
        drop(file);
        let staging_dir = staging.dir().to_path_buf();
        staging.remove().unwrap();
        assert!(!staging_dir.exists());
    }
}
