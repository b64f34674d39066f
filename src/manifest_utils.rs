//! URI resolution and the small descriptive-metadata inferences both parsers
//! need (C4's second half, alongside `uri_template`).

use url::Url;

use crate::error::{ManifestError, Result};

/// Resolve `maybe_relative` against `base`, the way every `BaseURL`/`media`/
/// `initialization` attribute in an MPD (or a playlist URI in an M3U8) is
/// resolved: absolute URIs are returned unchanged, everything else is joined
/// onto the base per RFC 3986.
pub fn resolve_uri(base: &Url, maybe_relative: &str) -> Result<Url> {
    base.join(maybe_relative)
        .map_err(|e| ManifestError::Other(anyhow::anyhow!("resolving {maybe_relative:?} against {base}: {e}")))
}

/// `dash-mpd-rs`-style MIME inference from a file extension, used when a
/// Representation/AdaptationSet omits `@mimeType` and it must be guessed from
/// the media URL (HLS has no `@mimeType` attribute at all, so this is its
/// only source).
pub fn guess_mime_type_from_uri(uri: &str) -> Option<&'static str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "mp4" | "m4s" | "m4v" | "m4a" | "cmfv" | "cmfa" => "video/mp4",
        "webm" => "video/webm",
        "ts" | "m2ts" => "video/mp2t",
        "aac" => "audio/aac",
        "ac3" => "audio/ac3",
        "ec3" => "audio/eac3",
        "mp3" => "audio/mpeg",
        "vtt" => "text/vtt",
        "ttml" | "dfxp" => "application/ttml+xml",
        _ => return None,
    })
}

/// HLS's default codec string when `EXT-X-STREAM-INF` omits `CODECS`, per
/// RFC 8216 §4.3.4.2 (the "historically common" H.264 Baseline + AAC-LC
/// pairing most encoders assumed before `CODECS` became mandatory in
/// practice).
pub const HLS_DEFAULT_CODECS: &str = "avc1.42E01E,mp4a.40.2";

/// Split a combined HLS `CODECS="a,b"` value into its audio/video halves by
/// the `mp4a`/`ec-3`/`ac-3`/`opus` vs. everything-else convention (HLS does
/// not tag which half of the list is audio, so this is the only signal
/// available without probing the media itself).
pub fn split_audio_video_codecs(codecs: &str) -> (Vec<&str>, Vec<&str>) {
    let mut audio = Vec::new();
    let mut video = Vec::new();
    for c in codecs.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let is_audio = c.starts_with("mp4a")
            || c.starts_with("ec-3")
            || c.starts_with("ac-3")
            || c.starts_with("opus")
            || c.starts_with("vorbis")
            || c.starts_with("flac");
        if is_audio {
            audio.push(c);
        } else {
            video.push(c);
        }
    }
    (audio, video)
}
