//! MPEG-TS first-PTS probe: align to the `0x47` sync byte at a 188/192/204
//! packet stride, decode the first PES header carrying a PTS, and return
//! `pts / 90000` seconds.

use crate::error::{ManifestError, Result};

const SYNC: u8 = 0x47;
const CANDIDATE_PACKET_SIZES: [usize; 3] = [188, 192, 204];

/// Detect the packet size by checking that the sync byte recurs at a fixed
/// stride for a run of consecutive packets.
fn detect_packet_size(data: &[u8]) -> Option<usize> {
    'outer: for &size in &CANDIDATE_PACKET_SIZES {
        if data.len() < size * 3 {
            continue;
        }
        for i in 0..3 {
            if data[i * size] != SYNC {
                continue 'outer;
            }
        }
        return Some(size);
    }
    None
}

/// Decode a 33-bit PTS from the 5-byte PTS/DTS field of a PES header,
/// per ITU-T H.222.0 §2.4.3.6.
fn decode_pts(field: &[u8]) -> u64 {
    let b0 = field[0] as u64;
    let b1 = field[1] as u64;
    let b2 = field[2] as u64;
    let b3 = field[3] as u64;
    let b4 = field[4] as u64;
    ((b0 >> 1) & 0x07) << 30 | (b1 << 22) | ((b2 >> 1) << 15) | (b3 << 7) | (b4 >> 1)
}

/// Scan `data` for the first PES header with a usable PTS and return
/// `pts / 90000` seconds.
pub fn probe_first_pts_s(data: &[u8]) -> Result<f64> {
    let packet_size = detect_packet_size(data)
        .ok_or_else(|| ManifestError::Other(anyhow::anyhow!("no MPEG-TS sync pattern found")))?;

    let mut pos = 0usize;
    while pos + packet_size <= data.len() {
        let packet = &data[pos..pos + packet_size];
        pos += packet_size;
        if packet[0] != SYNC {
            continue;
        }
        let payload_unit_start = packet[1] & 0x40 != 0;
        if !payload_unit_start {
            continue;
        }
        let adaptation_field_control = (packet[3] >> 4) & 0x3;
        let has_payload = adaptation_field_control == 0x1 || adaptation_field_control == 0x3;
        if !has_payload {
            continue;
        }
        let mut off = 4usize;
        if adaptation_field_control == 0x3 {
            if off >= packet.len() {
                continue;
            }
            let adaptation_len = packet[off] as usize;
            off += 1 + adaptation_len;
        }
        if off + 9 > packet.len() || &packet[off..off + 3] != [0x00, 0x00, 0x01] {
            continue;
        }
        let pts_dts_indicator = (packet[off + 7] >> 6) & 0x3;
        if pts_dts_indicator == 0 || pts_dts_indicator == 1 {
            return Err(ManifestError::Other(anyhow::anyhow!(
                "PES header has no usable PTS (pts_dts_indicator={pts_dts_indicator})"
            )));
        }
        let pts_field_start = off + 9;
        if pts_field_start + 5 > packet.len() {
            continue;
        }
        let pts = decode_pts(&packet[pts_field_start..pts_field_start + 5]);
        return Ok(pts as f64 / 90_000.0);
    }

    Err(ManifestError::Other(anyhow::anyhow!(
        "no PES packet with a usable PTS found in this buffer"
    )))
}
