//! Immutable value records for a single media segment (C1).

use std::sync::Arc;

/// The header (e.g. an MP4 `moov` box) required before any media segment of a
/// stream can be decoded. Many `SegmentReference`s share one `InitSegmentReference`,
/// so it is held behind an `Arc` rather than owned by each segment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSegmentReference {
    uris: Arc<[String]>,
    pub start_byte: u64,
    pub end_byte: Option<u64>,
}

impl InitSegmentReference {
    pub fn new(uris: Vec<String>, start_byte: u64, end_byte: Option<u64>) -> Self {
        InitSegmentReference {
            uris: uris.into(),
            start_byte,
            end_byte,
        }
    }

    /// A thunk: each call may re-resolve relative URIs, so callers should not
    /// assume the result is cached.
    pub fn get_uris(&self) -> Vec<String> {
        self.uris.to_vec()
    }
}

/// A single media segment: an immutable record of the byte range and
/// presentation-time range of one fragment of a stream, plus a link to its
/// (possibly shared) init segment.
///
/// `end_time_s` is exclusive and must be strictly greater than `start_time_s`;
/// `SegmentIndex` enforces this at construction and after every mutation.
#[derive(Debug, Clone)]
pub struct SegmentReference {
    pub position: u32,
    pub start_time_s: f64,
    pub end_time_s: f64,
    uris: Arc<[String]>,
    pub start_byte: u64,
    /// Inclusive; `None` means "to end of resource".
    pub end_byte: Option<u64>,
    pub init_ref: Option<Arc<InitSegmentReference>>,
    pub timestamp_offset_s: f64,
    pub append_window_start_s: f64,
    pub append_window_end_s: f64,
}

impl SegmentReference {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        position: u32,
        start_time_s: f64,
        end_time_s: f64,
        uris: Vec<String>,
        start_byte: u64,
        end_byte: Option<u64>,
        init_ref: Option<Arc<InitSegmentReference>>,
        timestamp_offset_s: f64,
        append_window_start_s: f64,
        append_window_end_s: f64,
    ) -> Self {
        debug_assert!(
            end_time_s > start_time_s,
            "segment end_time ({end_time_s}) must be strictly greater than start_time ({start_time_s})"
        );
        SegmentReference {
            position,
            start_time_s,
            end_time_s,
            uris: uris.into(),
            start_byte,
            end_byte,
            init_ref,
            timestamp_offset_s,
            append_window_start_s,
            append_window_end_s,
        }
    }

    pub fn get_uris(&self) -> Vec<String> {
        self.uris.to_vec()
    }

    pub fn duration_s(&self) -> f64 {
        self.end_time_s - self.start_time_s
    }

    /// Shift this reference's time fields by `delta_s`, used by
    /// `SegmentIndex::offset`.
    pub fn offset(&mut self, delta_s: f64) {
        self.start_time_s += delta_s;
        self.end_time_s += delta_s;
        self.timestamp_offset_s += delta_s;
    }

    /// A copy of this reference with its end time clamped to `period_end_s`,
    /// used by `SegmentIndex::fit`. Returns `None` if the clamp would make the
    /// segment empty or inverted.
    pub fn clamped_end(&self, period_end_s: f64) -> Option<SegmentReference> {
        if period_end_s <= self.start_time_s {
            return None;
        }
        let mut clone = self.clone();
        clone.end_time_s = clone.end_time_s.min(period_end_s);
        Some(clone)
    }
}

impl PartialEq for SegmentReference {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.start_time_s == other.start_time_s
            && self.end_time_s == other.end_time_s
            && self.start_byte == other.start_byte
            && self.end_byte == other.end_byte
    }
}

/// One expanded entry of a DASH `<SegmentTimeline>`, before it is converted
/// into `SegmentReference`s by a `SegmentTemplate`/`SegmentList` builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start_s: f64,
    pub end_s: f64,
    /// The unscaled (timescale-relative) start time, used to fill `$Time$`
    /// identifiers in URI templates.
    pub unscaled_start: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_segment_uris_are_shared() {
        let init = Arc::new(InitSegmentReference::new(vec!["init.mp4".into()], 0, Some(699)));
        let a = SegmentReference::new(0, 0.0, 2.0, vec!["a.m4s".into()], 0, None, Some(init.clone()), 0.0, 0.0, 2.0);
        let b = SegmentReference::new(1, 2.0, 4.0, vec!["b.m4s".into()], 0, None, Some(init.clone()), 0.0, 0.0, 4.0);
        assert!(Arc::ptr_eq(a.init_ref.as_ref().unwrap(), b.init_ref.as_ref().unwrap()));
    }

    #[test]
    fn offset_shifts_all_time_fields() {
        let mut r = SegmentReference::new(0, 1.0, 2.0, vec!["a.m4s".into()], 0, None, None, 0.5, 0.0, 2.0);
        r.offset(10.0);
        assert_eq!(r.start_time_s, 11.0);
        assert_eq!(r.end_time_s, 12.0);
        assert_eq!(r.timestamp_offset_s, 10.5);
    }
}
