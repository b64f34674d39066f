//! Intermediate master/media playlist model (C11), built by tokenizing tags
//! into typed structs before the top-level driver in `parser.rs` fuses them
//! into the shared `Period`/`Variant`/`Stream` model — the same two-stage
//! shape as `dash::xml` (typed tree) feeding `dash::parser` (model builder).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{ManifestError, Result};
use crate::hls::tags::{self, AttributeList, Entry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Master,
    Media,
}

/// Classify a playlist by the first media/master-only tag encountered, per
/// spec §4.10.1. Fails with `HlsPlaylistHeaderMissing` if `#EXTM3U` is not
/// the first line, and `HlsInvalidPlaylistHierarchy` if neither kind of tag
/// ever appears.
pub fn classify(text: &str) -> Result<PlaylistKind> {
    let entries = tags::tokenize(text);
    let mut iter = entries.into_iter();
    match iter.next() {
        Some(Entry::Tag(t)) if t.name == "EXTM3U" => {}
        _ => return Err(ManifestError::HlsPlaylistHeaderMissing),
    }
    for entry in iter {
        if let Entry::Tag(t) = entry {
            match t.name.as_str() {
                "EXT-X-STREAM-INF" | "EXT-X-MEDIA" | "EXT-X-I-FRAME-STREAM-INF" => {
                    return Ok(PlaylistKind::Master)
                }
                "EXTINF" | "EXT-X-TARGETDURATION" | "EXT-X-MEDIA-SEQUENCE" => {
                    return Ok(PlaylistKind::Media)
                }
                _ => {}
            }
        }
    }
    Err(ManifestError::HlsInvalidPlaylistHierarchy(
        "neither a master-playlist tag nor a media-playlist tag was found".to_string(),
    ))
}

/// One `EXT-X-MEDIA` rendition: an alternate audio/subtitle/closed-caption
/// track grouped by `GROUP-ID`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTag {
    pub media_type: String,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    pub uri: Option<String>,
    pub default: bool,
    pub autoselect: bool,
    /// `CLOSED-CAPTIONS` only: the in-band channel (e.g. `"CC1"`).
    pub instream_id: Option<String>,
    pub channels: Option<String>,
}

fn parse_media_tag(t: &tags::Tag) -> Result<MediaTag> {
    let a = t.attributes();
    let media_type = a
        .get("TYPE")
        .ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXT-X-MEDIA TYPE".into()))?
        .to_string();
    let group_id = a
        .get("GROUP-ID")
        .ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXT-X-MEDIA GROUP-ID".into()))?
        .to_string();
    Ok(MediaTag {
        media_type,
        group_id,
        name: a.get("NAME").unwrap_or("").to_string(),
        language: a.get("LANGUAGE").map(str::to_string),
        uri: a.get("URI").map(str::to_string),
        default: a.get_bool("DEFAULT"),
        autoselect: a.get_bool("AUTOSELECT"),
        instream_id: a.get("INSTREAM-ID").map(str::to_string),
        channels: a.get("CHANNELS").map(str::to_string),
    })
}

/// Parsed `EXT-X-STREAM-INF` attributes for one master-playlist variant.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInf {
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<f64>,
    pub audio_group: Option<String>,
    pub video_group: Option<String>,
    pub subtitles_group: Option<String>,
    /// `None` for both "absent" and the literal `CLOSED-CAPTIONS=NONE" —
    /// both mean this variant carries no in-band captions.
    pub closed_captions_group: Option<String>,
}

fn parse_stream_inf(t: &tags::Tag) -> Result<StreamInf> {
    let a = t.attributes();
    let bandwidth = a
        .get_u64("BANDWIDTH")
        .ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXT-X-STREAM-INF BANDWIDTH".into()))?;
    let resolution = a.get("RESOLUTION").and_then(|s| {
        let (w, h) = s.split_once('x')?;
        Some((w.parse().ok()?, h.parse().ok()?))
    });
    Ok(StreamInf {
        bandwidth,
        codecs: a.get("CODECS").map(str::to_string),
        resolution,
        frame_rate: a.get_f64("FRAME-RATE"),
        audio_group: a.get("AUDIO").map(str::to_string),
        video_group: a.get("VIDEO").map(str::to_string),
        subtitles_group: a.get("SUBTITLES").map(str::to_string),
        closed_captions_group: a.get("CLOSED-CAPTIONS").filter(|v| *v != "NONE").map(str::to_string),
    })
}

/// One master-playlist variant: a media-playlist URI paired with its
/// `EXT-X-STREAM-INF` attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: String,
    pub stream_inf: StreamInf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterPlaylist {
    pub variants: Vec<Variant>,
    pub media: Vec<MediaTag>,
    pub independent_segments: bool,
}

/// Parse a master playlist: `EXT-X-STREAM-INF`/URI pairs plus every
/// `EXT-X-MEDIA` rendition. `EXT-X-I-FRAME-STREAM-INF` (trick-play variants,
/// which have no following URI line) is recognized only for classification;
/// building trick-play streams is out of scope (not named by any [MODULE]).
pub fn parse_master(text: &str) -> Result<MasterPlaylist> {
    let entries = tags::tokenize(text);
    let mut iter = entries.into_iter().peekable();
    match iter.next() {
        Some(Entry::Tag(t)) if t.name == "EXTM3U" => {}
        _ => return Err(ManifestError::HlsPlaylistHeaderMissing),
    }

    let mut media = Vec::new();
    let mut variants = Vec::new();
    let mut independent_segments = false;
    let mut pending_stream_inf: Option<StreamInf> = None;

    for entry in iter {
        match entry {
            Entry::Tag(t) => match t.name.as_str() {
                "EXT-X-MEDIA" => media.push(parse_media_tag(&t)?),
                "EXT-X-STREAM-INF" => pending_stream_inf = Some(parse_stream_inf(&t)?),
                "EXT-X-INDEPENDENT-SEGMENTS" => independent_segments = true,
                _ => {}
            },
            Entry::Uri(uri) => {
                if let Some(stream_inf) = pending_stream_inf.take() {
                    variants.push(Variant { uri, stream_inf });
                }
            }
        }
    }

    Ok(MasterPlaylist { variants, media, independent_segments })
}

/// `EXT-X-MAP`: an init segment shared by every following media segment
/// until the next `EXT-X-MAP` (if any). Cached by `(uri, byterange)` by the
/// driver so that identical maps across playlists/updates share one
/// `InitSegmentReference`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InitSegmentTag {
    pub uri: String,
    pub byterange: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyTag {
    pub method: String,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateRangeTag {
    pub id: String,
    pub class: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration_s: Option<f64>,
    pub planned_duration_s: Option<f64>,
    pub scte35_out: Option<String>,
}

fn parse_daterange(a: &AttributeList) -> Result<DateRangeTag> {
    let id = a
        .get("ID")
        .ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXT-X-DATERANGE ID".into()))?
        .to_string();
    Ok(DateRangeTag {
        id,
        class: a.get("CLASS").map(str::to_string),
        start_date: a.get("START-DATE").and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        duration_s: a.get_f64("DURATION"),
        planned_duration_s: a.get_f64("PLANNED-DURATION"),
        scte35_out: a.get("SCTE35-OUT").map(str::to_string),
    })
}

/// Parse `length[@offset]`: offset absent means "contiguous with the
/// previous byte range on this URI", resolved by the caller.
fn parse_byterange_spec(s: &str) -> Option<(u64, Option<u64>)> {
    let mut parts = s.splitn(2, '@');
    let length: u64 = parts.next()?.trim().parse().ok()?;
    let offset = parts.next().and_then(|o| o.trim().parse::<u64>().ok());
    Some((length, offset))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration_s: f64,
    /// Resolved `(start_byte, end_byte)` inclusive range, or `None` for a
    /// whole-resource segment.
    pub byterange: Option<(u64, u64)>,
    pub discontinuity: bool,
    pub map: Option<Arc<InitSegmentTag>>,
    pub key: Option<KeyTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration_s: f64,
    pub media_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub end_list: bool,
    pub independent_segments: bool,
    pub segments: Vec<Segment>,
    pub date_ranges: Vec<DateRangeTag>,
}

impl MediaPlaylist {
    /// Per spec §4.10.5: VOD if explicitly typed or terminated by
    /// `EXT-X-ENDLIST`; LIVE otherwise (an explicit `EVENT` type is treated
    /// as LIVE here too, since it grows like a live playlist until its own
    /// eventual `EXT-X-ENDLIST`).
    pub fn is_vod(&self) -> bool {
        self.playlist_type == Some(PlaylistType::Vod) || self.end_list
    }
}

/// Parse a media playlist into its target duration, media sequence, typed
/// segments (with resolved init-segment/byterange/key state threaded across
/// lines), and date ranges.
pub fn parse_media(text: &str) -> Result<MediaPlaylist> {
    let entries = tags::tokenize(text);
    let mut iter = entries.into_iter().peekable();
    match iter.next() {
        Some(Entry::Tag(t)) if t.name == "EXTM3U" => {}
        _ => return Err(ManifestError::HlsPlaylistHeaderMissing),
    }

    let mut target_duration_s: Option<f64> = None;
    let mut media_sequence = 0u64;
    let mut playlist_type = None;
    let mut end_list = false;
    let mut independent_segments = false;
    let mut segments = Vec::new();
    let mut date_ranges = Vec::new();

    let mut pending_duration: Option<f64> = None;
    let mut pending_discontinuity = false;
    let mut pending_byterange: Option<(u64, Option<u64>)> = None;
    let mut current_map: Option<Arc<InitSegmentTag>> = None;
    let mut current_key: Option<KeyTag> = None;
    let mut last_byte_end: Option<u64> = None;

    for entry in iter {
        match entry {
            Entry::Tag(t) => match t.name.as_str() {
                "EXT-X-TARGETDURATION" => {
                    target_duration_s = t.value.as_deref().and_then(|v| v.parse().ok());
                }
                "EXT-X-MEDIA-SEQUENCE" => {
                    media_sequence = t.value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                "EXT-X-PLAYLIST-TYPE" => {
                    playlist_type = match t.value.as_deref() {
                        Some("VOD") => Some(PlaylistType::Vod),
                        Some("EVENT") => Some(PlaylistType::Event),
                        _ => None,
                    };
                }
                "EXT-X-ENDLIST" => end_list = true,
                "EXT-X-INDEPENDENT-SEGMENTS" => independent_segments = true,
                "EXTINF" => {
                    let raw = t.value.as_deref().unwrap_or("0");
                    let dur = raw.split(',').next().unwrap_or("0").trim().parse().unwrap_or(0.0);
                    pending_duration = Some(dur);
                }
                "EXT-X-DISCONTINUITY" => pending_discontinuity = true,
                "EXT-X-BYTERANGE" => {
                    pending_byterange = parse_byterange_spec(t.value.as_deref().unwrap_or(""));
                }
                "EXT-X-MAP" => {
                    let a = t.attributes();
                    let uri = a
                        .get("URI")
                        .ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXT-X-MAP URI".into()))?
                        .to_string();
                    let byterange = a.get("BYTERANGE").and_then(parse_byterange_spec).map(|(length, offset)| {
                        let start = offset.unwrap_or(0);
                        (start, start + length - 1)
                    });
                    current_map = Some(Arc::new(InitSegmentTag { uri, byterange }));
                }
                "EXT-X-KEY" => {
                    let a = t.attributes();
                    let method = a.get("METHOD").unwrap_or("NONE").to_string();
                    current_key = if method == "NONE" {
                        None
                    } else {
                        Some(KeyTag { method, uri: a.get("URI").map(str::to_string) })
                    };
                }
                "EXT-X-DATERANGE" => date_ranges.push(parse_daterange(&t.attributes())?),
                _ => {}
            },
            Entry::Uri(uri) => {
                let duration_s = pending_duration
                    .take()
                    .ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXTINF".into()))?;
                let byterange = pending_byterange.take().map(|(length, offset)| {
                    let start = offset.unwrap_or_else(|| last_byte_end.map(|e| e + 1).unwrap_or(0));
                    let end = start + length - 1;
                    last_byte_end = Some(end);
                    (start, end)
                });
                if byterange.is_none() {
                    last_byte_end = None;
                }
                segments.push(Segment {
                    uri,
                    duration_s,
                    byterange,
                    discontinuity: std::mem::take(&mut pending_discontinuity),
                    map: current_map.clone(),
                    key: current_key.clone(),
                });
            }
        }
    }

    let target_duration_s =
        target_duration_s.ok_or_else(|| ManifestError::HlsRequiredTagMissing("EXT-X-TARGETDURATION".into()))?;

    Ok(MediaPlaylist {
        target_duration_s,
        media_sequence,
        playlist_type,
        end_list,
        independent_segments,
        segments,
        date_ranges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aac\",NAME=\"English\",LANGUAGE=\"en\",URI=\"audio.m3u8\",DEFAULT=YES\n\
#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS,GROUP-ID=\"cc\",NAME=\"English\",LANGUAGE=\"en\",INSTREAM-ID=\"CC1\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,CODECS=\"avc1.4d401f,mp4a.40.2\",RESOLUTION=1280x720,AUDIO=\"aac\",CLOSED-CAPTIONS=\"cc\"\n\
720p.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2560000,CODECS=\"avc1.4d401f,mp4a.40.2\",RESOLUTION=1920x1080,AUDIO=\"aac\",CLOSED-CAPTIONS=\"cc\"\n\
1080p.m3u8\n";

    #[test]
    fn classifies_master_by_stream_inf() {
        assert_eq!(classify(MASTER).unwrap(), PlaylistKind::Master);
    }

    #[test]
    fn parses_master_variants_and_media_groups() {
        let m = parse_master(MASTER).unwrap();
        assert_eq!(m.variants.len(), 2);
        assert_eq!(m.variants[0].uri, "720p.m3u8");
        assert_eq!(m.variants[0].stream_inf.bandwidth, 1_280_000);
        assert_eq!(m.variants[0].stream_inf.resolution, Some((1280, 720)));
        assert_eq!(m.media.len(), 2);
        assert_eq!(m.media[1].instream_id.as_deref(), Some("CC1"));
    }

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-MEDIA-SEQUENCE:10\n\
#EXTINF:6.0,\n\
seg10.ts\n\
#EXTINF:6.0,\n\
seg11.ts\n\
#EXT-X-ENDLIST\n";

    #[test]
    fn parses_media_playlist_segments() {
        let p = parse_media(MEDIA).unwrap();
        assert_eq!(p.media_sequence, 10);
        assert_eq!(p.segments.len(), 2);
        assert!(p.is_vod());
        assert_eq!(p.segments[0].uri, "seg10.ts");
    }

    #[test]
    fn missing_extm3u_header_is_rejected() {
        let err = parse_media("#EXT-X-TARGETDURATION:6\n").unwrap_err();
        assert!(matches!(err, ManifestError::HlsPlaylistHeaderMissing));
    }

    #[test]
    fn missing_target_duration_is_required_tag_missing() {
        let err = parse_media("#EXTM3U\n#EXTINF:6.0,\na.ts\n").unwrap_err();
        assert!(matches!(err, ManifestError::HlsRequiredTagMissing(_)));
    }

    #[test]
    fn byterange_without_offset_is_contiguous_with_previous() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-BYTERANGE:1000@0\n#EXTINF:2.0,\na.mp4\n#EXT-X-BYTERANGE:500\n#EXTINF:2.0,\na.mp4\n";
        let p = parse_media(text).unwrap();
        assert_eq!(p.segments[0].byterange, Some((0, 999)));
        assert_eq!(p.segments[1].byterange, Some((1000, 1499)));
    }
}
