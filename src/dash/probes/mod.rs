//! Binary probes for indexes and first-sample times (C8): ISO BMFF `sidx`,
//! MP4 `tfdt`, MPEG-TS PES PTS, and WebM Cues. These never touch the network
//! themselves; callers hand them a byte buffer already obtained via the
//! `Fetcher`/init-segment collaborator.

pub mod mp4;
pub mod sidx;
pub mod ts;
pub mod webm;

use byteorder::{BigEndian, ReadBytesExt};

/// Read a big-endian `u32` at `data[pos..pos+4]`, bounds-checked per §6's
/// `BUFFER_READ_OUT_OF_BOUNDS` error kind.
pub(crate) fn read_u32_be(data: &[u8], pos: usize) -> crate::error::Result<u32> {
    let end = pos.checked_add(4).ok_or_else(|| crate::error::ManifestError::IntOverflow("read_u32_be offset".into()))?;
    let mut slice = data
        .get(pos..end)
        .ok_or(crate::error::ManifestError::BufferReadOutOfBounds { pos, len: 4, total: data.len() })?;
    Ok(slice.read_u32::<BigEndian>().unwrap())
}

pub(crate) fn read_u64_be(data: &[u8], pos: usize) -> crate::error::Result<u64> {
    let end = pos.checked_add(8).ok_or_else(|| crate::error::ManifestError::IntOverflow("read_u64_be offset".into()))?;
    let mut slice = data
        .get(pos..end)
        .ok_or(crate::error::ManifestError::BufferReadOutOfBounds { pos, len: 8, total: data.len() })?;
    Ok(slice.read_u64::<BigEndian>().unwrap())
}

pub(crate) fn read_u8(data: &[u8], pos: usize) -> crate::error::Result<u8> {
    data.get(pos)
        .copied()
        .ok_or(crate::error::ManifestError::BufferReadOutOfBounds { pos, len: 1, total: data.len() })
}

/// Find the first top-level box of `fourcc` in `data`, returning the byte
/// range of its payload (after the 8-byte size+type header, or 16 bytes for a
/// 64-bit extended-size box).
pub(crate) fn find_box<'a>(data: &'a [u8], fourcc: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let size = read_u32_be(data, pos).ok()? as usize;
        let kind = &data[pos + 4..pos + 8];
        let (header_len, box_len) = if size == 1 {
            let ext = read_u64_be(data, pos + 8).ok()? as usize;
            (16, ext)
        } else if size == 0 {
            (8, data.len() - pos)
        } else {
            (8, size)
        };
        if box_len < header_len || pos + box_len > data.len() {
            return None;
        }
        if kind == fourcc {
            return Some(&data[pos + header_len..pos + box_len]);
        }
        pos += box_len;
    }
    None
}

/// Recursively search nested boxes by path, e.g. `["moov", "trak", "mdia", "mdhd"]`.
pub(crate) fn find_box_path<'a>(mut data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    for fourcc in path {
        data = find_box(data, fourcc)?;
    }
    Some(data)
}
