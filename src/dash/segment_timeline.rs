//! Expansion of `<SegmentTimeline>` `<S t,d,r>` entries into scaled
//! `TimeRange`s (C6).

use crate::dash::xml::SegmentTimeline;
use crate::error::Warnings;
use crate::model::segment_reference::TimeRange;

const GAP_OVERLAP_TOLERANCE_S: f64 = 1.0 / 15.0;

/// Expand a `<SegmentTimeline>` into a flat, scaled sequence of `TimeRange`s.
///
/// `unscaled_pto` is the presentation time offset in the same (unscaled)
/// units as `t`/`d`; `period_duration_s` bounds an open-ended (`r < 0`) final
/// `<S>` that has no following sibling with an explicit `t`.
pub fn build(
    timeline: &SegmentTimeline,
    timescale: u64,
    unscaled_pto: i64,
    period_duration_s: f64,
    warnings: &mut Warnings,
) -> Vec<TimeRange> {
    assert!(timescale > 0, "SegmentTimeline requires timescale > 0");
    let mut out: Vec<TimeRange> = Vec::new();
    let mut last_end: i64 = 0;

    for (i, s) in timeline.segments.iter().enumerate() {
        let d = match s.d {
            Some(d) if d > 0 => d,
            _ => {
                warnings.push("SegmentTimeline <S> element is missing a valid @d; stopping expansion");
                break;
            }
        };
        let mut start = match s.t {
            Some(t) => t - unscaled_pto,
            None => last_end,
        };

        let repeat: i64 = match s.r {
            Some(r) if r >= 0 => r,
            Some(_) => {
                // r < 0: open-ended, resolved against the next <S>'s t, or
                // against the period duration if this is the last entry.
                let next_t = timeline.segments[i + 1..]
                    .iter()
                    .find_map(|next| next.t)
                    .map(|t| t - unscaled_pto);
                match next_t {
                    Some(next_t) => {
                        if start >= next_t {
                            warnings.push(format!(
                                "SegmentTimeline <S> at start {start} is not before the next explicit t={next_t}; stopping expansion"
                            ));
                            break;
                        }
                        ((next_t - start) as f64 / d as f64).ceil() as i64 - 1
                    }
                    None => {
                        if !period_duration_s.is_finite() {
                            warnings.push(
                                "SegmentTimeline <S> has an open-ended repeat with no following t and no finite period duration; stopping expansion",
                            );
                            break;
                        }
                        let period_duration_unscaled = period_duration_s * timescale as f64;
                        if (start as f64) >= period_duration_unscaled {
                            warnings.push(format!(
                                "SegmentTimeline <S> at start {start} is at or past the period duration; stopping expansion"
                            ));
                            break;
                        }
                        ((period_duration_unscaled - start as f64) / d as f64).ceil() as i64 - 1
                    }
                }
            }
            None => 0,
        };

        if let Some(prev) = out.last_mut() {
            let expected_start_s = prev.end_s;
            let actual_start_s = start as f64 / timescale as f64;
            if (actual_start_s - expected_start_s).abs() >= GAP_OVERLAP_TOLERANCE_S {
                warnings.push(format!(
                    "SegmentTimeline gap/overlap of {:.3}s between segments; adjusting previous end to {actual_start_s:.3}",
                    actual_start_s - expected_start_s
                ));
            }
            prev.end_s = actual_start_s;
        }

        for _ in 0..=repeat {
            let end = start + d;
            out.push(TimeRange {
                start_s: start as f64 / timescale as f64,
                end_s: end as f64 / timescale as f64,
                unscaled_start: start.max(0) as u64,
            });
            start = end;
        }
        last_end = start;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(entries: &[(Option<i64>, Option<i64>, Option<i64>)]) -> SegmentTimeline {
        use crate::dash::xml::S;
        SegmentTimeline {
            segments: entries
                .iter()
                .map(|&(t, d, r)| S { t, d, r })
                .collect(),
        }
    }

    #[test]
    fn negative_repeat_resolved_against_next_t() {
        let tl = timeline(&[(Some(0), Some(4), Some(-1)), (Some(12), Some(4), None)]);
        let mut w = Warnings::default();
        let ranges = build(&tl, 1, 0, f64::INFINITY, &mut w);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].start_s, 0.0);
        assert_eq!(ranges[0].end_s, 4.0);
        assert_eq!(ranges[1].start_s, 4.0);
        assert_eq!(ranges[2].start_s, 8.0);
        assert_eq!(ranges[2].end_s, 12.0);
        assert_eq!(ranges[3].start_s, 12.0);
        assert_eq!(ranges[3].end_s, 16.0);
        assert!(w.is_empty());
    }

    #[test]
    fn missing_next_t_falls_back_to_period_duration() {
        let tl = timeline(&[(Some(0), Some(5), Some(-1))]);
        let mut w = Warnings::default();
        let ranges = build(&tl, 1, 0, 30.0, &mut w);
        assert_eq!(ranges.len(), 6);
        assert_eq!(ranges.last().unwrap().end_s, 30.0);
    }

    #[test]
    fn implicit_start_continues_from_last_end() {
        let tl = timeline(&[(Some(0), Some(4), None), (None, Some(4), None)]);
        let mut w = Warnings::default();
        let ranges = build(&tl, 1, 0, f64::INFINITY, &mut w);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].start_s, 4.0);
        assert_eq!(ranges[1].end_s, 8.0);
    }

    #[test]
    fn missing_d_warns_and_stops() {
        let tl = timeline(&[(Some(0), None, None)]);
        let mut w = Warnings::default();
        let ranges = build(&tl, 1, 0, f64::INFINITY, &mut w);
        assert!(ranges.is_empty());
        assert_eq!(w.0.len(), 1);
    }
}
