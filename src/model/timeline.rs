//! Live/VOD presentation clock model (C3).

use crate::model::segment_reference::SegmentReference;

/// The clock that maps a stream's segment timestamps onto what a player is
/// currently allowed to seek and buffer into.
///
/// Invariants upheld by this type: `is_live() == !self.static_`;
/// `seek_range_end() <= segment_availability_end()`; for VOD,
/// `segment_availability_end() == self.duration_s`.
#[derive(Debug, Clone, Copy)]
pub struct PresentationTimeline {
    presentation_start_s: Option<f64>,
    delay_s: f64,
    duration_s: f64,
    segment_availability_duration_s: f64,
    static_: bool,
    max_segment_duration_s: f64,
    min_segment_start_s: f64,
    max_segment_end_s: Option<f64>,
    user_seek_start_s: Option<f64>,
}

impl PresentationTimeline {
    pub fn new(presentation_start_s: Option<f64>, delay_s: f64, static_: bool) -> Self {
        PresentationTimeline {
            presentation_start_s,
            delay_s,
            duration_s: f64::INFINITY,
            segment_availability_duration_s: f64::INFINITY,
            static_,
            max_segment_duration_s: 1.0,
            min_segment_start_s: 0.0,
            max_segment_end_s: None,
            user_seek_start_s: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.static_
    }

    pub fn static_(&self) -> bool {
        self.static_
    }

    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    pub fn delay_s(&self) -> f64 {
        self.delay_s
    }

    pub fn max_segment_duration_s(&self) -> f64 {
        self.max_segment_duration_s
    }

    pub fn presentation_start_s(&self) -> Option<f64> {
        self.presentation_start_s
    }

    pub fn set_static(&mut self, static_: bool) {
        self.static_ = static_;
    }

    pub fn set_duration(&mut self, duration_s: f64) {
        self.duration_s = duration_s;
    }

    pub fn set_segment_availability_duration(&mut self, duration_s: f64) {
        self.segment_availability_duration_s = duration_s;
    }

    pub fn set_delay(&mut self, delay_s: f64) {
        self.delay_s = delay_s;
    }

    pub fn set_user_seek_start(&mut self, t: f64) {
        self.user_seek_start_s = Some(t);
    }

    /// Extend the observed segment-time range for live-edge tracking. Call
    /// once per freshly built/merged batch of `SegmentReference`s.
    pub fn notify_segments(&mut self, refs: &[SegmentReference]) {
        for r in refs {
            self.min_segment_start_s = self.min_segment_start_s.min(r.start_time_s);
            self.max_segment_end_s = Some(
                self.max_segment_end_s
                    .map_or(r.end_time_s, |prev| prev.max(r.end_time_s)),
            );
            let duration = r.duration_s();
            if duration.is_finite() && duration > self.max_segment_duration_s {
                self.max_segment_duration_s = duration;
            }
        }
    }

    /// The start of the window the player is currently allowed to buffer
    /// into.
    pub fn segment_availability_start(&self, now_s: f64) -> f64 {
        if self.static_ {
            return self.user_seek_start_s.unwrap_or(0.0);
        }
        (self.segment_availability_end(now_s) - self.segment_availability_duration_s).max(0.0)
    }

    /// The end of the window the player is currently allowed to buffer into:
    /// for live, the live edge minus `delay_s`, clamped to the latest segment
    /// time observed via [`notify_segments`]; for VOD, the fixed duration.
    pub fn segment_availability_end(&self, now_s: f64) -> f64 {
        if self.static_ {
            return self.duration_s;
        }
        let live_edge = match self.presentation_start_s {
            Some(start) => (now_s - start - self.delay_s).max(0.0),
            None => now_s - self.delay_s,
        };
        match self.max_segment_end_s {
            Some(observed) => live_edge.min(observed),
            None => live_edge,
        }
    }

    /// The latest position a player may seek to.
    pub fn seek_range_end(&self, now_s: f64) -> f64 {
        self.segment_availability_end(now_s)
    }

    pub fn seek_range_start(&self, now_s: f64) -> f64 {
        self.segment_availability_start(now_s)
    }

    /// Shift every observed time by `-delta_s`, used at the end of HLS
    /// parsing to zero-base a timeline built from wall-clock-free
    /// `EXTINF` durations.
    pub fn offset(&mut self, delta_s: f64) {
        self.min_segment_start_s -= delta_s;
        if self.duration_s.is_finite() {
            self.duration_s -= delta_s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vod_availability_end_equals_duration() {
        let mut t = PresentationTimeline::new(None, 0.0, true);
        t.set_duration(120.0);
        assert_eq!(t.segment_availability_end(999.0), 120.0);
        assert!(!t.is_live());
    }

    #[test]
    fn live_availability_end_tracks_wall_clock_minus_delay() {
        let mut t = PresentationTimeline::new(Some(1000.0), 6.0, false);
        t.set_segment_availability_duration(30.0);
        let end = t.segment_availability_end(1050.0);
        assert_eq!(end, 1050.0 - 1000.0 - 6.0);
        assert!(t.is_live());
    }

    #[test]
    fn static_seek_range_honors_user_seek_start() {
        let mut t = PresentationTimeline::new(None, 0.0, true);
        t.set_duration(100.0);
        t.set_user_seek_start(10.0);
        assert_eq!(t.seek_range_start(0.0), 10.0);
    }

    #[test]
    fn notify_segments_tracks_max_duration() {
        let mut t = PresentationTimeline::new(None, 0.0, false);
        let refs = vec![
            SegmentReference::new(0, 0.0, 4.0, vec!["a".into()], 0, None, None, 0.0, 0.0, 4.0),
            SegmentReference::new(1, 4.0, 10.0, vec!["b".into()], 0, None, None, 0.0, 4.0, 10.0),
        ];
        t.notify_segments(&refs);
        assert_eq!(t.max_segment_duration_s(), 6.0);
    }
}
