//! ISO BMFF `sidx` (Segment Index Box) parsing, producing `SegmentReference`s
//! with byte ranges and times recovered straight from the index rather than
//! from a `SegmentTimeline`/`SegmentTemplate` computation (DASH
//! `SegmentBase@indexRange` and `SegmentTemplate@index`).

use std::sync::Arc;

use crate::dash::probes::{find_box, read_u32_be, read_u64_be, read_u8};
use crate::error::{ManifestError, Result};
use crate::model::segment_reference::{InitSegmentReference, SegmentReference};

/// One parsed `sidx` reference entry.
struct SidxEntry {
    reference_type: u8,
    referenced_size: u32,
    subsegment_duration: u32,
    #[allow(dead_code)]
    starts_with_sap: bool,
}

/// Parse a buffer that begins with (or contains, at offset 0) a `sidx` box
/// and emit one `SegmentReference` per subsegment entry. `base_byte_offset`
/// is the absolute byte position, within the full media resource, of the
/// first byte *after* the `sidx` box itself (where `first_offset` is
/// measured from); `media_uris` and `init_ref` are attached to every emitted
/// reference; `position_start` numbers the first emitted reference.
#[allow(clippy::too_many_arguments)]
pub fn parse_sidx(
    data: &[u8],
    base_byte_offset: u64,
    media_uris: Vec<String>,
    init_ref: Option<Arc<InitSegmentReference>>,
    position_start: u32,
    timestamp_offset_s: f64,
    append_window_start_s: f64,
    append_window_end_s: f64,
) -> Result<Vec<SegmentReference>> {
    let body = find_box(data, b"sidx").ok_or(ManifestError::Mp4SidxWrongBoxType)?;

    let version = read_u8(body, 0)?;
    // flags occupy body[1..4], unused.
    let mut pos = 4usize;
    let _reference_id = read_u32_be(body, pos)?;
    pos += 4;
    let timescale = read_u32_be(body, pos)?;
    if timescale == 0 {
        return Err(ManifestError::Mp4SidxInvalidTimescale);
    }
    pos += 4;

    let earliest_presentation_time: u64;
    let first_offset: u64;
    if version == 0 {
        earliest_presentation_time = read_u32_be(body, pos)? as u64;
        pos += 4;
        first_offset = read_u32_be(body, pos)? as u64;
        pos += 4;
    } else {
        earliest_presentation_time = read_u64_be(body, pos)?;
        pos += 8;
        first_offset = read_u64_be(body, pos)?;
        pos += 8;
    }
    // reserved u16 + reference_count u16
    pos += 2;
    let reference_count = {
        let hi = read_u8(body, pos)? as u16;
        let lo = read_u8(body, pos + 1)? as u16;
        (hi << 8) | lo
    };
    pos += 2;

    let mut entries = Vec::with_capacity(reference_count as usize);
    for _ in 0..reference_count {
        let word0 = read_u32_be(body, pos)?;
        pos += 4;
        let subsegment_duration = read_u32_be(body, pos)?;
        pos += 4;
        let word2 = read_u32_be(body, pos)?;
        pos += 4;

        let reference_type = (word0 >> 31) as u8;
        let referenced_size = word0 & 0x7FFF_FFFF;
        let starts_with_sap = (word2 >> 31) & 1 == 1;

        entries.push(SidxEntry {
            reference_type,
            referenced_size,
            subsegment_duration,
            starts_with_sap,
        });
    }

    if entries.iter().any(|e| e.reference_type == 1) {
        return Err(ManifestError::Mp4SidxTypeNotSupported);
    }

    let mut refs = Vec::with_capacity(entries.len());
    let mut byte_pos = base_byte_offset + first_offset;
    let mut pes = earliest_presentation_time;
    let uris: Arc<[String]> = media_uris.into();
    for (i, e) in entries.iter().enumerate() {
        let start_s = pes as f64 / timescale as f64 + timestamp_offset_s;
        let end_s = (pes + e.subsegment_duration as u64) as f64 / timescale as f64 + timestamp_offset_s;
        let start_byte = byte_pos;
        let end_byte = byte_pos + e.referenced_size as u64 - 1;
        refs.push(SegmentReference::new(
            position_start + i as u32,
            start_s,
            end_s,
            uris.to_vec(),
            start_byte,
            Some(end_byte),
            init_ref.clone(),
            timestamp_offset_s,
            append_window_start_s,
            append_window_end_s,
        ));
        byte_pos = end_byte + 1;
        pes += e.subsegment_duration as u64;
    }

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sidx(version: u8, timescale: u32, eptp: u32, first_offset: u32, refs: &[(u32, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(version);
        body.extend_from_slice(&[0, 0, 0]); // flags
        body.extend_from_slice(&1u32.to_be_bytes()); // reference_id
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&eptp.to_be_bytes());
        body.extend_from_slice(&first_offset.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes()); // reserved
        body.extend_from_slice(&(refs.len() as u16).to_be_bytes());
        for &(size, duration) in refs {
            body.extend_from_slice(&size.to_be_bytes()); // type=0 in high bit
            body.extend_from_slice(&duration.to_be_bytes());
            body.extend_from_slice(&(1u32 << 31).to_be_bytes()); // SAP=1
        }
        let mut out = Vec::new();
        out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(b"sidx");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_three_references() {
        let buf = build_sidx(1, 90000, 180000, 0, &[(1000, 90000), (1200, 90000), (900, 90000)]);
        let refs = parse_sidx(&buf, 0, vec!["media.mp4".into()], None, 0, 0.0, 0.0, f64::INFINITY).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].start_time_s, 2.0);
        assert_eq!(refs[0].start_byte, 0);
        assert_eq!(refs[0].end_byte, Some(999));
        assert_eq!(refs[1].start_byte, 1000);
        assert_eq!(refs[1].end_byte, Some(2199));
        assert_eq!(refs[1].start_time_s, 3.0);
        assert_eq!(refs[2].start_time_s, 4.0);
    }

    #[test]
    fn zero_timescale_is_rejected() {
        let buf = build_sidx(0, 0, 0, 0, &[(100, 1000)]);
        let err = parse_sidx(&buf, 0, vec!["m.mp4".into()], None, 0, 0.0, 0.0, f64::INFINITY).unwrap_err();
        assert!(matches!(err, ManifestError::Mp4SidxInvalidTimescale));
    }

    #[test]
    fn hierarchical_sidx_is_rejected() {
        let mut buf = build_sidx(0, 1000, 0, 0, &[(100, 1000)]);
        // Flip the top bit of the first reference's size word to mark it
        // type=1 (hierarchical).
        let word_pos = buf.len() - 12;
        buf[word_pos] |= 0x80;
        let err = parse_sidx(&buf, 0, vec!["m.mp4".into()], None, 0, 0.0, 0.0, f64::INFINITY).unwrap_err();
        assert!(matches!(err, ManifestError::Mp4SidxTypeNotSupported));
    }

    #[test]
    fn wrong_box_type_is_rejected() {
        let mut buf = vec![0u8; 16];
        buf[4..8].copy_from_slice(b"moov");
        let err = parse_sidx(&buf, 0, vec![], None, 0, 0.0, 0.0, f64::INFINITY).unwrap_err();
        assert!(matches!(err, ManifestError::Mp4SidxWrongBoxType));
    }
}
