//! Recovers a fragment's first-sample start time from `moov/trak/mdia/mdhd`
//! (timescale) and `moof/traf/tfdt` (base media decode time), for HLS
//! `fMP4`/`CMAF` segments that carry no explicit timestamp anywhere else.

use crate::dash::probes::{find_box, find_box_path, read_u32_be, read_u64_be, read_u8};
use crate::error::{ManifestError, Result};

/// Read the `timescale` field out of a `mdhd` box (version 0 or 1).
fn mdhd_timescale(mdhd: &[u8]) -> Result<u32> {
    let version = read_u8(mdhd, 0)?;
    // flags occupy [1..4]; version 0 has 32-bit creation/modification times,
    // version 1 has 64-bit ones, both followed by a 32-bit timescale.
    let offset = if version == 1 { 4 + 8 + 8 } else { 4 + 4 + 4 };
    read_u32_be(mdhd, offset)
}

/// Read `base_media_decode_time` out of a `tfdt` box (version 0 or 1).
fn tfdt_base_decode_time(tfdt: &[u8]) -> Result<u64> {
    let version = read_u8(tfdt, 0)?;
    if version == 1 {
        read_u64_be(tfdt, 4)
    } else {
        Ok(read_u32_be(tfdt, 4)? as u64)
    }
}

/// Probe a buffer containing (at least) a `moov` box with one track and a
/// `moof` fragment, returning the fragment's start time in seconds:
/// `base_media_decode_time / timescale`.
pub fn probe_start_time_s(data: &[u8]) -> Result<f64> {
    let mdhd = find_box_path(data, &[b"moov", b"trak", b"mdia", b"mdhd"])
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("no moov/trak/mdia/mdhd box found")))?;
    let timescale = mdhd_timescale(mdhd)?;
    if timescale == 0 {
        return Err(ManifestError::Mp4SidxInvalidTimescale);
    }
    let traf = find_box_path(data, &[b"moof", b"traf"])
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("no moof/traf box found")))?;
    let tfdt = find_box(traf, b"tfdt")
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("traf box has no tfdt child")))?;
    let base_decode_time = tfdt_base_decode_time(tfdt)?;
    Ok(base_decode_time as f64 / timescale as f64)
}

/// The HLS `EXT-X-MAP` variant of the above: CMAF media segments usually
/// carry only `moof`/`traf`/`tfdt`, with the track's `timescale` living in
/// the separately fetched init segment's `moov`.
pub fn probe_fragment_start_time_s(init_data: &[u8], segment_data: &[u8]) -> Result<f64> {
    let mdhd = find_box_path(init_data, &[b"moov", b"trak", b"mdia", b"mdhd"])
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("no moov/trak/mdia/mdhd box found in init segment")))?;
    let timescale = mdhd_timescale(mdhd)?;
    if timescale == 0 {
        return Err(ManifestError::Mp4SidxInvalidTimescale);
    }
    let traf = find_box_path(segment_data, &[b"moof", b"traf"])
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("no moof/traf box found in media segment")))?;
    let tfdt = find_box(traf, b"tfdt")
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("traf box has no tfdt child")))?;
    let base_decode_time = tfdt_base_decode_time(tfdt)?;
    Ok(base_decode_time as f64 / timescale as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn mdhd_v0(timescale: u32) -> Vec<u8> {
        let mut body = vec![0u8]; // version
        body.extend_from_slice(&[0, 0, 0]); // flags
        body.extend_from_slice(&0u32.to_be_bytes()); // creation
        body.extend_from_slice(&0u32.to_be_bytes()); // modification
        body.extend_from_slice(&timescale.to_be_bytes());
        bump_box(b"mdhd", &body)
    }

    fn tfdt_v1(base: u64) -> Vec<u8> {
        let mut body = vec![1u8];
        body.extend_from_slice(&[0, 0, 0]);
        body.extend_from_slice(&base.to_be_bytes());
        bump_box(b"tfdt", &body)
    }

    #[test]
    fn recovers_start_time_from_moov_and_moof() {
        let mdia = bump_box(b"mdia", &mdhd_v0(1000));
        let trak = bump_box(b"trak", &mdia);
        let moov = bump_box(b"moov", &trak);
        let traf = bump_box(b"traf", &tfdt_v1(5000));
        let moof = bump_box(b"moof", &traf);
        let mut data = moov;
        data.extend_from_slice(&moof);
        assert_eq!(probe_start_time_s(&data).unwrap(), 5.0);
    }

    #[test]
    fn recovers_fragment_start_time_from_separate_init_and_media() {
        let mdia = bump_box(b"mdia", &mdhd_v0(90_000));
        let trak = bump_box(b"trak", &mdia);
        let init = bump_box(b"moov", &trak);
        let traf = bump_box(b"traf", &tfdt_v1(180_000));
        let segment = bump_box(b"moof", &traf);
        assert_eq!(probe_fragment_start_time_s(&init, &segment).unwrap(), 2.0);
    }
}
