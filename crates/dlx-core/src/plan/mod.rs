//! Segment Planner: turns a [`RemoteDescriptor`] into a [`SegmentPlan`],
//! reusing a prior journal's plan verbatim when its validator still matches.

use crate::journal::Journal;
use crate::probe::RemoteDescriptor;

/// A single segment: byte range `[start, end)` (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// HTTP `Range` header value for fetching from `resume_from` (inclusive)
    /// through the end of this segment (inclusive end).
    pub fn range_header_value(&self, resume_from: u64) -> String {
        let start = self.start + resume_from;
        if start >= self.end {
            format!("bytes={}-{}", self.end.saturating_sub(1), self.end.saturating_sub(1))
        } else {
            format!("bytes={}-{}", start, self.end - 1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentPlan {
    pub segments: Vec<Segment>,
    pub range_supported: bool,
}

impl SegmentPlan {
    pub fn single(total_len: Option<u64>) -> Self {
        let end = total_len.unwrap_or(0);
        SegmentPlan {
            segments: vec![Segment { start: 0, end }],
            range_supported: false,
        }
    }
}

const DEFAULT_TARGET_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;
const DEFAULT_MAX_PARALLELISM: usize = 8;

/// Planning policy options; mirrors the relevant subset of [`crate::config::DlxConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub target_segment_size: u64,
    pub max_parallelism: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            target_segment_size: DEFAULT_TARGET_SEGMENT_SIZE,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
        }
    }
}

/// Produces a segment plan for `remote`, reusing `existing_journal`'s plan
/// verbatim when its recorded validator still matches `remote`.
#[tracing::instrument(skip_all, fields(total_len = ?remote.total_len, accepts_ranges = remote.accepts_ranges))]
pub fn plan(remote: &RemoteDescriptor, opts: PlanOptions, existing_journal: Option<&Journal>) -> SegmentPlan {
    if let Some(journal) = existing_journal {
        if !remote.conflicts_with(&journal.remote) {
            tracing::debug!(segments = journal.segments.len(), "reusing existing journal's segment plan");
            return SegmentPlan {
                segments: journal.segments.iter().map(|s| Segment { start: s.start, end: s.end }).collect(),
                range_supported: journal.range_supported,
            };
        }
    }

    if !remote.accepts_ranges || remote.total_len.is_none() {
        return SegmentPlan::single(remote.total_len);
    }

    let total = remote.total_len.unwrap();
    if total == 0 {
        return SegmentPlan {
            segments: vec![Segment { start: 0, end: 0 }],
            range_supported: true,
        };
    }

    let n = div_ceil(total, opts.target_segment_size.max(1))
        .clamp(1, opts.max_parallelism.max(1) as u64) as usize;
    tracing::debug!(segment_count = n, total_len = total, "planned fresh segment layout");

    SegmentPlan {
        segments: plan_segments(total, n),
        range_supported: true,
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Splits `total_size` into `segment_count` equal-ish ranges; earlier
/// segments absorb the remainder when the division is uneven.
fn plan_segments(total_size: u64, segment_count: usize) -> Vec<Segment> {
    if total_size == 0 || segment_count == 0 {
        return Vec::new();
    }

    let segment_count_u64 = segment_count as u64;
    let base = total_size / segment_count_u64;
    let remainder = total_size % segment_count_u64;

    let mut out = Vec::with_capacity(segment_count);
    let mut offset = 0u64;
    for i in 0..segment_count_u64 {
        let len = base + if i < remainder { 1 } else { 0 };
        let end = (offset + len).min(total_size);
        out.push(Segment { start: offset, end });
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Validator;

    fn descriptor(total_len: Option<u64>, accepts_ranges: bool) -> RemoteDescriptor {
        RemoteDescriptor {
            total_len,
            accepts_ranges,
            validator: Validator::Strong("v1".into()),
            content_type: None,
            content_disposition: None,
        }
    }

    #[test]
    fn plan_segments_even() {
        let segs = plan_segments(1000, 4);
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[0], Segment { start: 0, end: 250 });
        assert_eq!(segs[3], Segment { start: 750, end: 1000 });
    }

    #[test]
    fn plan_segments_remainder_favors_earlier() {
        let segs = plan_segments(10, 4);
        assert_eq!(segs[0], Segment { start: 0, end: 3 });
        assert_eq!(segs[1], Segment { start: 3, end: 6 });
        assert_eq!(segs[2], Segment { start: 6, end: 8 });
        assert_eq!(segs[3], Segment { start: 8, end: 10 });
    }

    #[test]
    fn plan_falls_back_to_single_without_range_support() {
        let remote = descriptor(Some(1000), false);
        let p = plan(&remote, PlanOptions::default(), None);
        assert_eq!(p.segments.len(), 1);
        assert!(!p.range_supported);
    }

    #[test]
    fn plan_falls_back_to_single_without_known_length() {
        let remote = descriptor(None, true);
        let p = plan(&remote, PlanOptions::default(), None);
        assert_eq!(p.segments.len(), 1);
        assert!(!p.range_supported);
    }

    #[test]
    fn plan_clamps_segment_count_to_max_parallelism() {
        let remote = descriptor(Some(1024 * 1024 * 1024), true);
        let opts = PlanOptions {
            target_segment_size: 1024 * 1024,
            max_parallelism: 8,
        };
        let p = plan(&remote, opts, None);
        assert_eq!(p.segments.len(), 8);
    }

    #[test]
    fn plan_never_splits_when_range_unsupported() {
        let remote = descriptor(Some(64 * 1024 * 1024), false);
        let p = plan(&remote, PlanOptions::default(), None);
        assert_eq!(p.segments.len(), 1);
    }

    #[test]
    fn segment_range_header_resumes_from_offset() {
        let s = Segment { start: 100, end: 200 };
        assert_eq!(s.range_header_value(0), "bytes=100-199");
        assert_eq!(s.range_header_value(50), "bytes=150-199");
    }
}
