//! An ordered, evictable, updatable catalogue of segment references (C2).

use std::collections::VecDeque;

use crate::error::Warnings;
use crate::model::segment_reference::SegmentReference;
use crate::scheduler::Timer;

const GAP_OVERLAP_TOLERANCE_S: f64 = 1.0 / 15.0;
/// Tolerance used by `merge` to decide whether two references describe "the
/// same" segment boundary that has merely been refined by a later manifest.
const MERGE_END_TOLERANCE_S: f64 = 0.1;

/// An ordered, mutable sequence of `SegmentReference`s. Positions are strictly
/// increasing and contiguous once the index has been populated; start times
/// are non-decreasing.
///
/// A `SegmentIndex` owns at most one update timer at a time (armed by
/// `update_every`); `destroy` stops it and empties the index.
pub struct SegmentIndex {
    refs: VecDeque<SegmentReference>,
    timer: Option<Box<dyn Timer>>,
}

impl std::fmt::Debug for SegmentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentIndex")
            .field("refs", &self.refs)
            .field("has_timer", &self.timer.is_some())
            .finish()
    }
}

impl Default for SegmentIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentIndex {
    pub fn new() -> Self {
        SegmentIndex {
            refs: VecDeque::new(),
            timer: None,
        }
    }

    pub fn from_refs(refs: Vec<SegmentReference>) -> Self {
        SegmentIndex {
            refs: refs.into(),
            timer: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentReference> {
        self.refs.iter()
    }

    /// `O(1)` lookup by position, valid once the index is non-empty.
    pub fn get(&self, position: u32) -> Option<&SegmentReference> {
        let first = self.refs.front()?.position;
        if position < first {
            return None;
        }
        let idx = (position - first) as usize;
        self.refs.get(idx)
    }

    /// Locate the reference covering time `t` (`start <= t < end`). If `t`
    /// precedes the first reference, returns the first reference's position
    /// (the earliest addressable segment). Scans from the tail, which is the
    /// common case for live playback seeking near the live edge.
    pub fn find(&self, t: f64) -> Option<u32> {
        if self.refs.is_empty() {
            return None;
        }
        if t < self.refs.front().unwrap().start_time_s {
            return Some(self.refs.front().unwrap().position);
        }
        for r in self.refs.iter().rev() {
            if r.start_time_s <= t && t < r.end_time_s {
                return Some(r.position);
            }
        }
        None
    }

    /// Add `delta_s` to every reference's start/end/timestamp-offset times.
    pub fn offset(&mut self, delta_s: f64) {
        for r in self.refs.iter_mut() {
            r.offset(delta_s);
        }
    }

    /// Drop every reference whose end time is at or before `t`. Idempotent:
    /// calling `evict` twice with the same `t` has the same effect as calling
    /// it once.
    pub fn evict(&mut self, t: f64) {
        while let Some(front) = self.refs.front() {
            if front.end_time_s <= t {
                self.refs.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop references fully outside `[period_start, period_end)` and clamp
    /// the last remaining reference's end time to `period_end`.
    pub fn fit(&mut self, period_start_s: f64, period_end_s: f64) {
        self.refs
            .retain(|r| r.end_time_s > period_start_s && r.start_time_s < period_end_s);
        if let Some(last) = self.refs.back_mut() {
            if last.end_time_s > period_end_s {
                last.end_time_s = period_end_s;
            }
        }
    }

    /// Extend-only merge of a freshly parsed set of references into this
    /// index, preserving existing positions. See spec §4.7 for the full
    /// algorithm; summarized:
    ///
    /// - entries with an equal start time as an existing entry are dropped,
    ///   unless they are the tail of both lists and their end times diverge
    ///   by more than `MERGE_END_TOLERANCE_S`, in which case the tail is
    ///   replaced (new timing, old position);
    /// - a new entry preceding the current first entry is prepended (segment
    ///   re-appearing after a prior eviction);
    /// - a new entry preceding an existing entry at index > 0 is refused
    ///   (interleaving is not supported) and a warning is raised;
    /// - anything left over after the overlap is appended, continuing
    ///   position numbering.
    pub fn merge(&mut self, new_refs: Vec<SegmentReference>, warnings: &mut Warnings) {
        if new_refs.is_empty() {
            return;
        }
        if self.refs.is_empty() {
            self.refs = new_refs.into();
            return;
        }

        let mut new_iter = new_refs.into_iter().peekable();

        // Handle references that precede the current front: these are
        // segments re-appearing after eviction and are prepended in order.
        let mut prepend = Vec::new();
        while let Some(n) = new_iter.peek() {
            if n.start_time_s < self.refs.front().unwrap().start_time_s {
                prepend.push(new_iter.next().unwrap());
            } else {
                break;
            }
        }
        for (i, mut p) in prepend.into_iter().rev().enumerate() {
            let new_position = self.refs.front().unwrap().position - 1 - i as u32;
            p.position = new_position;
            self.refs.push_front(p);
        }

        let mut old_idx = 0usize;
        let mut next_position = self.refs.back().unwrap().position + 1;

        while let Some(n) = new_iter.peek() {
            if old_idx >= self.refs.len() {
                break;
            }
            let old_start = self.refs[old_idx].start_time_s;
            if (n.start_time_s - old_start).abs() < f64::EPSILON {
                let is_tail = old_idx == self.refs.len() - 1;
                let old_end = self.refs[old_idx].end_time_s;
                if is_tail && (n.end_time_s - old_end).abs() > MERGE_END_TOLERANCE_S {
                    let mut replacement = new_iter.next().unwrap();
                    replacement.position = self.refs[old_idx].position;
                    self.refs[old_idx] = replacement;
                } else {
                    // Duplicate of an existing entry: drop it.
                    new_iter.next();
                }
                old_idx += 1;
            } else if n.start_time_s < old_start {
                if old_idx == 0 {
                    // Already handled above in the prepend pass; this branch
                    // should not be reachable, but guard defensively.
                    new_iter.next();
                } else {
                    warnings.push(format!(
                        "SegmentIndex::merge: refusing to interleave a segment starting at {} before existing segment at index {old_idx} (start {old_start}); dropping it",
                        n.start_time_s
                    ));
                    new_iter.next();
                }
            } else {
                // n.start_time_s > old_start: there is still existing
                // coverage ahead of this new entry; advance through the old
                // list until we reach or pass it.
                old_idx += 1;
            }
        }

        // Whatever is left in new_iter starts at or after the last existing
        // reference's start time: append it, continuing position numbering.
        for mut n in new_iter {
            n.position = next_position;
            next_position += 1;
            self.refs.push_back(n);
        }
    }

    /// Arm a recurring refresh: `callback` is invoked once after `interval_s`,
    /// its returned references are appended, and the timer stops itself once
    /// the index becomes empty (e.g. all segments evicted and none replaced).
    pub fn update_every(
        &mut self,
        timer: Box<dyn Timer>,
        interval_s: std::time::Duration,
    ) {
        self.timer = Some(timer);
        if let Some(t) = &mut self.timer {
            t.arm_every(interval_s);
        }
    }

    /// Apply the result of one `update_every` tick: append `new_refs` and
    /// stop the timer if the index ends up empty.
    pub fn apply_refresh(&mut self, new_refs: Vec<SegmentReference>) {
        for r in new_refs {
            self.refs.push_back(r);
        }
        if self.refs.is_empty() {
            if let Some(t) = &mut self.timer {
                t.stop();
            }
        }
    }

    /// Stop any owned timer and clear all references.
    pub fn destroy(&mut self) {
        if let Some(t) = &mut self.timer {
            t.stop();
        }
        self.timer = None;
        self.refs.clear();
    }

    /// Verify the §3 ordering/contiguity invariants; used by tests (including
    /// the `proptest` property suite in `tests/segment_index_proptest.rs`).
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut prev: Option<&SegmentReference> = None;
        for r in self.refs.iter() {
            if r.end_time_s <= r.start_time_s {
                return Err(format!("ref at position {} has end <= start", r.position));
            }
            if let Some(p) = prev {
                if p.position + 1 != r.position {
                    return Err(format!(
                        "positions not contiguous: {} followed by {}",
                        p.position, r.position
                    ));
                }
                if p.start_time_s > r.start_time_s {
                    return Err("start times not non-decreasing".to_string());
                }
                if p.start_time_s == r.start_time_s && p.end_time_s > r.end_time_s {
                    return Err("equal start times but end times decreasing".to_string());
                }
            }
            prev = Some(r);
        }
        Ok(())
    }
}

impl Drop for SegmentIndex {
    fn drop(&mut self) {
        if let Some(t) = &mut self.timer {
            t.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(position: u32, start: f64, end: f64) -> SegmentReference {
        SegmentReference::new(
            position,
            start,
            end,
            vec![format!("s{position}.m4s")],
            0,
            None,
            None,
            0.0,
            start,
            end,
        )
    }

    #[test]
    fn find_before_first_returns_first_position() {
        let idx = SegmentIndex::from_refs(vec![r(0, 5.0, 10.0), r(1, 10.0, 15.0)]);
        assert_eq!(idx.find(0.0), Some(0));
        assert_eq!(idx.find(5.0), Some(0));
        assert_eq!(idx.find(12.0), Some(1));
        assert_eq!(idx.find(20.0), None);
    }

    #[test]
    fn get_is_position_relative() {
        let idx = SegmentIndex::from_refs(vec![r(10, 0.0, 5.0), r(11, 5.0, 10.0)]);
        assert_eq!(idx.get(10).unwrap().start_time_s, 0.0);
        assert_eq!(idx.get(11).unwrap().start_time_s, 5.0);
        assert!(idx.get(9).is_none());
        assert!(idx.get(12).is_none());
    }

    #[test]
    fn evict_is_idempotent() {
        let mut a = SegmentIndex::from_refs(vec![r(0, 0.0, 5.0), r(1, 5.0, 10.0), r(2, 10.0, 15.0)]);
        let mut b = SegmentIndex::from_refs(vec![r(0, 0.0, 5.0), r(1, 5.0, 10.0), r(2, 10.0, 15.0)]);
        a.evict(6.0);
        a.evict(6.0);
        b.evict(6.0);
        assert_eq!(a.len(), b.len());
        assert_eq!(a.get(2).unwrap().position, b.get(2).unwrap().position);
    }

    #[test]
    fn offset_commutes_with_find() {
        let mut idx = SegmentIndex::from_refs(vec![r(0, 0.0, 5.0), r(1, 5.0, 10.0)]);
        let before = idx.find(7.0);
        idx.offset(100.0);
        assert_eq!(idx.find(107.0), before);
    }

    #[test]
    fn merge_extends_tail_with_overlap() {
        let mut idx = SegmentIndex::from_refs(vec![r(10, 0.0, 5.0), r(11, 5.0, 10.0), r(12, 10.0, 15.0), r(13, 15.0, 20.0)]);
        let mut w = Warnings::default();
        // overlaps last two, adds two new
        idx.merge(
            vec![r(0, 10.0, 15.0), r(0, 15.0, 20.0), r(0, 20.0, 25.0), r(0, 25.0, 30.0)],
            &mut w,
        );
        assert!(idx.check_invariants().is_ok());
        assert_eq!(idx.len(), 6);
        assert_eq!(idx.get(10).unwrap().start_time_s, 0.0);
        assert_eq!(idx.get(15).unwrap().start_time_s, 25.0);
    }

    #[test]
    fn merge_prepends_reappearing_segment() {
        let mut idx = SegmentIndex::from_refs(vec![r(5, 10.0, 15.0), r(6, 15.0, 20.0)]);
        let mut w = Warnings::default();
        idx.merge(vec![r(0, 5.0, 10.0)], &mut w);
        assert!(idx.check_invariants().is_ok());
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.get(4).unwrap().start_time_s, 5.0);
    }

    #[test]
    fn fit_clamps_tail_and_drops_outside() {
        let mut idx = SegmentIndex::from_refs(vec![r(0, 0.0, 5.0), r(1, 5.0, 10.0), r(2, 10.0, 15.0)]);
        idx.fit(0.0, 12.0);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.get(2).unwrap().end_time_s, 12.0);
    }
}
