//! Resumable, multipart HTTP(S) download engine.
//!
//! Embeddable by host applications: hand `Coordinator` a URL and an output
//! path and it probes the origin, plans segments, fetches them with bounded
//! concurrency and retries, journals progress so a crash can resume exactly
//! where it left off, and atomically publishes the final file.

pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod url_model;

pub mod probe;
pub mod plan;
pub mod journal;
pub mod staging;
pub mod retry;
pub mod fetcher;
pub mod scheduler;
pub mod assembler;
pub mod coordinator;

pub use coordinator::{Coordinator, DownloadJob, DownloadOptions, JobHandle, JobState, Outcome};
pub use error::{DlxError, ErrorKind};
