//! Recovering a media playlist's start time by probing its first segment
//! (spec §4.10.3): partial-range first, falling back to a full fetch, since
//! HLS carries no wall-clock-independent timestamp of its own the way a DASH
//! `SegmentTimeline`'s `@t` does.

use crate::dash::probes::{mp4, ts};
use crate::error::{ManifestError, Result};
use crate::manifest_utils::guess_mime_type_from_uri;

/// How many bytes of a segment are fetched on the first (partial-range)
/// probe attempt before falling back to a full fetch.
pub const PROBE_RANGE_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Ts,
}

/// Classify a segment URI's container from its file extension, the only
/// signal HLS offers (there is no `@mimeType` attribute). Raw elementary
/// streams (AAC/AC3/EC3/MP3) and anything unrecognized are reported as
/// `None`; the caller turns that into `HLS_INTERNAL_SKIP_STREAM`.
pub fn classify_container(uri: &str) -> Option<Container> {
    match guess_mime_type_from_uri(uri)? {
        "video/mp4" => Some(Container::Mp4),
        "video/mp2t" => Some(Container::Ts),
        _ => None,
    }
}

/// Probe `segment_data` (optionally alongside `init_data`, for CMAF segments
/// whose `timescale` lives in a separate `EXT-X-MAP` init segment) for its
/// first sample's presentation time, per the container detected from `uri`.
pub fn probe_start_time_s(uri: &str, init_data: Option<&[u8]>, segment_data: &[u8]) -> Result<f64> {
    match classify_container(uri) {
        Some(Container::Ts) => ts::probe_first_pts_s(segment_data),
        Some(Container::Mp4) => match init_data {
            Some(init) => mp4::probe_fragment_start_time_s(init, segment_data),
            None => mp4::probe_start_time_s(segment_data),
        },
        None => Err(ManifestError::HlsInternalSkipStream(format!(
            "cannot determine a container to probe a start time from for {uri}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ts_and_mp4_containers() {
        assert_eq!(classify_container("seg.ts"), Some(Container::Ts));
        assert_eq!(classify_container("seg.m4s"), Some(Container::Mp4));
        assert_eq!(classify_container("seg.aac"), None);
    }
}
