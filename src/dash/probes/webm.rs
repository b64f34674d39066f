//! WebM `Cues` parsing for WebM-DASH `SegmentBase` indexing (C8). A hand-rolled
//! EBML walker in the same register as the ISO BMFF box readers in
//! `sidx.rs`/`mp4.rs`: it only decodes the handful of element IDs the segment
//! index needs (`Segment`, `Cues`, `CuePoint`, `CueTime`,
//! `CueTrackPositions`, `CueClusterPosition`), not a general Matroska parser.

use std::sync::Arc;

use crate::error::{ManifestError, Result};
use crate::model::segment_reference::{InitSegmentReference, SegmentReference};

const ID_SEGMENT: u32 = 0x1853_8067;
const ID_CUES: u32 = 0x1C53_BB6B;
const ID_CUE_POINT: u32 = 0xBB;
const ID_CUE_TIME: u32 = 0xB3;
const ID_CUE_TRACK_POSITIONS: u32 = 0xB7;
const ID_CUE_CLUSTER_POSITION: u32 = 0xF1;

/// Read an EBML element ID starting at `pos`: the ID is the raw bytes
/// including their length-marker bit, 1 to 4 bytes long.
fn read_element_id(data: &[u8], pos: usize) -> Option<(u32, usize)> {
    let first = *data.get(pos)?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 || pos + len > data.len() {
        return None;
    }
    let mut value: u32 = 0;
    for &b in &data[pos..pos + len] {
        value = (value << 8) | b as u32;
    }
    Some((value, len))
}

/// Read an EBML size descriptor (VINT with the marker bit stripped).
fn read_element_size(data: &[u8], pos: usize) -> Option<(u64, usize)> {
    let first = *data.get(pos)?;
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || pos + len > data.len() {
        return None;
    }
    let mask = 0xFFu8 >> len;
    let mut value: u64 = (first & mask) as u64;
    for &b in &data[pos + 1..pos + len] {
        value = (value << 8) | b as u64;
    }
    Some((value, len))
}

fn read_uint(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

struct CuePoint {
    time: Option<u64>,
    cluster_position: Option<u64>,
}

/// Walk `data` (a full or partial WebM file, or just the bytes covering
/// `Segment > Cues`) and collect every `CuePoint`'s time and cluster
/// position.
fn collect_cue_points(data: &[u8]) -> Result<Vec<CuePoint>> {
    fn find_child<'a>(data: &'a [u8], id: u32) -> Option<&'a [u8]> {
        let mut pos = 0usize;
        while pos < data.len() {
            let (eid, id_len) = read_element_id(data, pos)?;
            let (size, size_len) = read_element_size(data, pos + id_len)?;
            let body_start = pos + id_len + size_len;
            let body_end = body_start.checked_add(size as usize)?.min(data.len());
            if eid == id {
                return Some(&data[body_start..body_end]);
            }
            pos = body_end;
        }
        None
    }

    let segment = find_child(data, ID_SEGMENT).unwrap_or(data);
    let cues = find_child(segment, ID_CUES)
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("no Cues element found in WebM Segment")))?;

    let mut points = Vec::new();
    let mut pos = 0usize;
    while pos < cues.len() {
        let (eid, id_len) = read_element_id(cues, pos)
            .ok_or(ManifestError::BufferReadOutOfBounds { pos, len: 1, total: cues.len() })?;
        let (size, size_len) = read_element_size(cues, pos + id_len)
            .ok_or(ManifestError::BufferReadOutOfBounds { pos: pos + id_len, len: 1, total: cues.len() })?;
        let body_start = pos + id_len + size_len;
        let body_end = (body_start + size as usize).min(cues.len());
        if eid == ID_CUE_POINT {
            let body = &cues[body_start..body_end];
            let mut cp = CuePoint { time: None, cluster_position: None };
            let mut p = 0usize;
            while p < body.len() {
                let (ceid, cid_len) = match read_element_id(body, p) {
                    Some(v) => v,
                    None => break,
                };
                let (csize, csize_len) = match read_element_size(body, p + cid_len) {
                    Some(v) => v,
                    None => break,
                };
                let cbody_start = p + cid_len + csize_len;
                let cbody_end = (cbody_start + csize as usize).min(body.len());
                let cbody = &body[cbody_start..cbody_end];
                match ceid {
                    ID_CUE_TIME => cp.time = Some(read_uint(cbody)),
                    ID_CUE_TRACK_POSITIONS => {
                        let mut q = 0usize;
                        while q < cbody.len() {
                            let (teid, tid_len) = match read_element_id(cbody, q) {
                                Some(v) => v,
                                None => break,
                            };
                            let (tsize, tsize_len) = match read_element_size(cbody, q + tid_len) {
                                Some(v) => v,
                                None => break,
                            };
                            let tbody_start = q + tid_len + tsize_len;
                            let tbody_end = (tbody_start + tsize as usize).min(cbody.len());
                            if teid == ID_CUE_CLUSTER_POSITION {
                                cp.cluster_position = Some(read_uint(&cbody[tbody_start..tbody_end]));
                            }
                            q = tbody_end;
                        }
                    }
                    _ => {}
                }
                p = cbody_end;
            }
            points.push(cp);
        }
        pos = body_end;
    }
    Ok(points)
}

/// Build `SegmentReference`s from a WebM buffer's Cues, one per consecutive
/// cue-point pair (the last cue's segment runs to `total_size`, if known, or
/// is left open-ended). WebM SegmentBase indexing requires an init segment
/// (the spec's `DASH_WEBM_MISSING_INIT` failure mode is raised by the caller
/// before this is reached, since that check belongs to the DASH segment
/// builder, not to Cues parsing itself).
pub fn parse_cues(
    data: &[u8],
    total_size: Option<u64>,
    timescale: f64,
    media_uris: Vec<String>,
    init_ref: Arc<InitSegmentReference>,
    position_start: u32,
    timestamp_offset_s: f64,
    append_window_start_s: f64,
    append_window_end_s: f64,
) -> Result<Vec<SegmentReference>> {
    let points = collect_cue_points(data)?;
    if points.is_empty() {
        return Err(ManifestError::Other(anyhow::anyhow!("WebM Cues contained no CuePoint elements")));
    }

    let uris: Arc<[String]> = media_uris.into();
    let mut refs = Vec::with_capacity(points.len());
    for (i, cp) in points.iter().enumerate() {
        let time = cp.time.ok_or_else(|| ManifestError::Other(anyhow::anyhow!("CuePoint missing CueTime")))?;
        let start_byte = cp
            .cluster_position
            .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("CuePoint missing CueClusterPosition")))?;
        let start_s = time as f64 / timescale + timestamp_offset_s;
        let end_byte = points
            .get(i + 1)
            .and_then(|n| n.cluster_position)
            .map(|next| next - 1)
            .or(total_size.map(|t| t - 1));
        let end_s = points
            .get(i + 1)
            .and_then(|n| n.time)
            .map(|next_time| next_time as f64 / timescale + timestamp_offset_s)
            .unwrap_or(f64::INFINITY);
        refs.push(SegmentReference::new(
            position_start + i as u32,
            start_s,
            end_s,
            uris.to_vec(),
            start_byte,
            end_byte,
            Some(init_ref.clone()),
            timestamp_offset_s,
            append_window_start_s,
            append_window_end_s,
        ));
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ebml_id(id: u32, len: usize) -> Vec<u8> {
        id.to_be_bytes()[4 - len..].to_vec()
    }

    fn ebml_size(size: u64, len: usize) -> Vec<u8> {
        let marker = 1u8 << (8 - len);
        let mut bytes = size.to_be_bytes()[8 - len..].to_vec();
        bytes[0] |= marker;
        bytes
    }

    fn element(id: u32, id_len: usize, body: &[u8]) -> Vec<u8> {
        let mut out = ebml_id(id, id_len);
        out.extend(ebml_size(body.len() as u64, 1));
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn parses_two_cue_points_into_segment_references() {
        let cue_time_0 = element(ID_CUE_TIME, 1, &[0]);
        let cue_track_pos_0 = element(ID_CUE_TRACK_POSITIONS, 1, &element(ID_CUE_CLUSTER_POSITION, 1, &[0]));
        let mut cp0_body = cue_time_0;
        cp0_body.extend(cue_track_pos_0);
        let cue_point_0 = element(ID_CUE_POINT, 1, &cp0_body);

        let cue_time_1 = element(ID_CUE_TIME, 1, &[2]);
        let cue_track_pos_1 = element(ID_CUE_TRACK_POSITIONS, 1, &element(ID_CUE_CLUSTER_POSITION, 1, &[100]));
        let mut cp1_body = cue_time_1;
        cp1_body.extend(cue_track_pos_1);
        let cue_point_1 = element(ID_CUE_POINT, 1, &cp1_body);

        let mut cues_body = cue_point_0;
        cues_body.extend(cue_point_1);
        let cues = element(ID_CUES, 4, &cues_body);
        let segment = element(ID_SEGMENT, 4, &cues);

        let init = Arc::new(InitSegmentReference::new(vec!["init.webm".into()], 0, Some(199)));
        let refs = parse_cues(&segment, Some(500), 1.0, vec!["media.webm".into()], init, 0, 0.0, 0.0, f64::INFINITY).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].start_time_s, 0.0);
        assert_eq!(refs[0].start_byte, 0);
        assert_eq!(refs[0].end_byte, Some(99));
        assert_eq!(refs[1].start_time_s, 2.0);
        assert_eq!(refs[1].start_byte, 100);
        assert_eq!(refs[1].end_byte, Some(499));
    }
}
