//! Top-level HLS driver (C11): classify and parse a master playlist, fetch
//! and parse every referenced media playlist, probe the first segment of the
//! first audio/video rendition to anchor a shared presentation-time
//! baseline, and fuse everything into the shared [`crate::model`] tree. Live
//! presentations are refreshed on a loop shaped like
//! [`crate::dash::parser::DashParser`]'s.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ManifestError, Result, Warnings};
use crate::fetch::{Fetcher, RetryParams};
use crate::hls::{playlist, start_time};
use crate::manifest_utils::{guess_mime_type_from_uri, resolve_uri, split_audio_video_codecs, HLS_DEFAULT_CODECS};
use crate::model::segment_reference::{InitSegmentReference, SegmentReference};
use crate::model::{
    Manifest, ManifestUpdate, Period, PresentationTimeline, SegmentIndex, Stream, StreamKind,
    TimelineRegion, Variant,
};
use crate::registry::Registry;

/// Carries the state a live presentation needs to thread across repeated
/// parses: the refresh cadence, and the presentation-time baseline probed
/// from the first audio/video playlist's first segment (spec §4.10.3),
/// reused on every subsequent update so later refreshes never re-probe it.
#[derive(Debug, Clone, Default)]
pub struct HlsParseState {
    pub refresh_interval_s: Option<f64>,
    pub playlist_start_time_s: Option<f64>,
    /// Per-stream `(position, end_time_s)` of the last segment built, so a
    /// later refresh whose MEDIA-SEQUENCE has advanced (segments evicted
    /// from the server's sliding window) can anchor its cumulative EXTINF
    /// sum to where the previous fetch left off instead of restarting at 0.
    stream_anchors: HashMap<String, (u32, f64)>,
}

/// Drives a single HLS presentation: initial master-playlist parse plus (for
/// playlists without `EXT-X-ENDLIST`/`PLAYLIST-TYPE:VOD`) periodic refreshes
/// merged into the existing per-stream `SegmentIndex`es.
pub struct HlsParser {
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<dyn Registry>,
}

impl HlsParser {
    pub fn new(fetcher: Arc<dyn Fetcher>, registry: Arc<dyn Registry>) -> Self {
        HlsParser { fetcher, registry }
    }

    /// Fetch and parse `master_uri` into a complete `Manifest`.
    pub async fn parse(&self, master_uri: &str) -> Result<Manifest> {
        let mut state = HlsParseState::default();
        self.parse_with_state(master_uri, &mut state).await
    }

    /// Like [`Self::parse`], but threads an [`HlsParseState`] in and out so a
    /// caller driving [`Self::run_live_updates`] can reuse the probed
    /// baseline and refresh cadence across repeated calls.
    pub async fn parse_with_state(&self, master_uri: &str, state: &mut HlsParseState) -> Result<Manifest> {
        let mut warnings = Warnings::default();
        let base = Url::parse(master_uri)?;
        let text = self.fetch_text(master_uri).await?;
        if playlist::classify(&text)? == playlist::PlaylistKind::Media {
            return Err(ManifestError::HlsMasterPlaylistNotProvided);
        }
        let master = playlist::parse_master(&text)?;

        let audio_media: Vec<&playlist::MediaTag> =
            master.media.iter().filter(|m| m.media_type == "AUDIO").collect();
        let subtitle_media: Vec<&playlist::MediaTag> =
            master.media.iter().filter(|m| m.media_type == "SUBTITLES").collect();
        let cc_media: Vec<&playlist::MediaTag> =
            master.media.iter().filter(|m| m.media_type == "CLOSED-CAPTIONS").collect();

        let (cc_map, cc_text_streams) = build_closed_caption_groups(&cc_media);

        let mut accum = Accumulators::default();
        let mut audio_cache: HashMap<String, Option<Arc<Stream>>> = HashMap::new();
        let mut variants_out = Vec::new();
        let mut seen_pairs: HashSet<String> = HashSet::new();

        for v in &master.variants {
            let video_uri = resolve_uri(&base, &v.uri)?;
            let audio_group = v.stream_inf.audio_group.clone();
            let audio_member = audio_group.as_deref().and_then(|g| {
                audio_media
                    .iter()
                    .find(|m| m.group_id == g && m.default && m.uri.is_some())
                    .or_else(|| audio_media.iter().find(|m| m.group_id == g && m.uri.is_some()))
                    .copied()
            });
            let audio_abs_uri = audio_member
                .and_then(|m| m.uri.as_deref())
                .map(|u| resolve_uri(&base, u))
                .transpose()?;

            // Open question (a): collapse variants that resolve to the same
            // (video, audio) URI pair, the way the source dedupes on this key.
            let dedup_key = format!(
                "{video_uri} - {}",
                audio_abs_uri.as_ref().map(Url::as_str).unwrap_or("")
            );
            if !seen_pairs.insert(dedup_key) {
                continue;
            }

            let codecs = v.stream_inf.codecs.clone().unwrap_or_else(|| HLS_DEFAULT_CODECS.to_string());
            let (audio_codecs, video_codecs) = split_audio_video_codecs(&codecs);
            if audio_codecs.is_empty() && video_codecs.is_empty() {
                return Err(ManifestError::HlsCouldNotGuessCodecs);
            }
            let video_codecs_str = if video_codecs.is_empty() { codecs.clone() } else { video_codecs.join(",") };

            let video_built = match self
                .build_media_stream(
                    &format!("video-{}", v.uri),
                    &video_uri,
                    video_codecs_str,
                    StreamKind::Video,
                    None,
                    true,
                    &mut state.playlist_start_time_s,
                    &mut state.stream_anchors,
                )
                .await
            {
                Ok(b) => b,
                Err(ManifestError::HlsInternalSkipStream(msg)) => {
                    warnings.push(format!("skipping variant {}: {msg}", v.uri));
                    continue;
                }
                Err(e) => return Err(e),
            };
            accum.fold(&video_built);
            let mut video_stream = video_built.stream;
            video_stream.bandwidth = Some(v.stream_inf.bandwidth);
            if let Some((w, h)) = v.stream_inf.resolution {
                video_stream.width = Some(w);
                video_stream.height = Some(h);
            }
            video_stream.frame_rate = v.stream_inf.frame_rate;
            if let Some(cc_group) = &v.stream_inf.closed_captions_group {
                if let Some(map) = cc_map.get(cc_group) {
                    video_stream.closed_captions = map.clone();
                }
            }

            let audio_stream = match (&audio_group, audio_member) {
                (Some(g), Some(m)) => {
                    self.get_or_build_audio_stream(
                        &mut audio_cache,
                        &base,
                        g,
                        m,
                        &mut accum,
                        &mut state.playlist_start_time_s,
                        &mut state.stream_anchors,
                        &mut warnings,
                    )
                    .await?
                }
                _ => None,
            };

            let mut variant = Variant::new(v.uri.clone());
            variant.bandwidth = Some(v.stream_inf.bandwidth);
            variant.language = audio_stream
                .as_ref()
                .and_then(|a| a.language.clone())
                .or_else(|| video_stream.language.clone());
            variant.video = Some(Arc::new(video_stream));
            variant.audio = audio_stream;
            variants_out.push(variant);
        }

        let mut text_streams_out: Vec<Arc<Stream>> = cc_text_streams;
        let mut seen_subtitle_keys: HashSet<String> = HashSet::new();
        for m in &subtitle_media {
            let Some(uri) = &m.uri else { continue };
            let key = format!("{}-{}", m.group_id, m.name);
            if !seen_subtitle_keys.insert(key.clone()) {
                continue;
            }
            let abs = resolve_uri(&base, uri)?;
            match self
                .build_media_stream(
                    &key,
                    &abs,
                    String::new(),
                    StreamKind::Text,
                    m.language.clone(),
                    false,
                    &mut state.playlist_start_time_s,
                    &mut state.stream_anchors,
                )
                .await
            {
                Ok(built) => {
                    accum.fold(&built);
                    text_streams_out.push(Arc::new(built.stream));
                }
                Err(ManifestError::HlsInternalSkipStream(msg)) => {
                    warnings.push(format!("skipping subtitle track {key}: {msg}"));
                }
                Err(e) => return Err(e),
            }
        }

        let is_live = !accum.any_vod;
        let mut timeline = PresentationTimeline::new(None, 0.0, !is_live);
        if is_live {
            timeline.set_delay(3.0 * accum.max_target_duration_s);
            let availability_window = if accum.min_target_duration_s.is_finite() {
                accum.min_target_duration_s
            } else {
                accum.max_target_duration_s
            };
            timeline.set_segment_availability_duration(availability_window);
            state.refresh_interval_s = Some(availability_window.max(1.0));
        } else {
            timeline.set_duration(accum.max_end_s);
            state.refresh_interval_s = None;
        }

        let mut period = Period::new("hls".to_string(), 0.0);
        period.variants = variants_out;
        period.text_streams = text_streams_out;
        period.regions = accum.regions;

        if !is_live {
            // §4.10.6: zero-base every stream's timeline so the minimum
            // observed timestamp is 0, since EXTINF durations carry no
            // absolute clock of their own.
            let min_start = all_streams(&period)
                .filter_map(|s| s.segment_index.lock().unwrap().iter().next().map(|r| r.start_time_s))
                .fold(f64::INFINITY, f64::min);
            if min_start.is_finite() && min_start != 0.0 {
                for s in all_streams(&period) {
                    s.segment_index.lock().unwrap().offset(-min_start);
                }
                timeline.offset(min_start);
            }
        }

        let all_refs: Vec<SegmentReference> = all_streams(&period)
            .flat_map(|s| s.segment_index.lock().unwrap().iter().cloned().collect::<Vec<_>>())
            .collect();
        timeline.notify_segments(&all_refs);

        let mut periods = vec![period];
        self.registry.filter_all_periods(&mut periods);

        let mut manifest = Manifest::new(timeline);
        manifest.periods = periods;

        if !warnings.is_empty() {
            tracing::debug!(count = warnings.0.len(), "HLS parse completed with warnings");
        }

        Ok(manifest)
    }

    /// Re-fetch `master_uri`: merge any newly discovered segment references
    /// into the matching streams of `manifest` (looked up by stream id), and
    /// freeze the presentation to VOD if an `EXT-X-ENDLIST` appeared.
    /// Update-time failures are demoted to recoverable per the propagation
    /// policy, never aborting the caller's live loop.
    pub async fn update_once(
        &self,
        manifest: &mut Manifest,
        master_uri: &str,
        state: &mut HlsParseState,
    ) -> Result<ManifestUpdate> {
        let fresh = match self.parse_with_state(master_uri, state).await {
            Ok(m) => m,
            Err(e) => return Err(e.demote_for_update()),
        };
        let new_duration_s = fresh.presentation_timeline.duration_s();

        let mut warnings = Warnings::default();
        let mut segments_added = 0usize;
        if let (Some(existing), Some(new_period)) = (manifest.periods.first(), fresh.periods.first()) {
            merge_period_streams_by_id(existing, new_period, &mut segments_added, &mut warnings);
        }

        // §9(c): an `EXT-X-ENDLIST` arriving mid-update transitions LIVE to
        // VOD and freezes the duration; later overlapping updates would
        // still win last-write-wins on `duration_s` if this fires again.
        if fresh.presentation_timeline.static_() && manifest.presentation_timeline.is_live() {
            manifest.presentation_timeline.set_static(true);
            manifest.presentation_timeline.set_duration(new_duration_s);
        }

        Ok(ManifestUpdate {
            segments_added,
            segments_evicted: 0,
            new_duration_s: Some(new_duration_s),
        })
    }

    /// Run the live-update loop until `stop` is cancelled: sleep for the
    /// current refresh interval, reparse, merge, and repeat; a failed update
    /// retries after a short 0.1s backoff rather than tearing down the loop.
    /// Returns once the presentation has transitioned to VOD.
    pub async fn run_live_updates(
        &self,
        master_uri: String,
        manifest: Arc<tokio::sync::Mutex<Manifest>>,
        mut state: HlsParseState,
        stop: CancellationToken,
    ) {
        loop {
            let interval_s = state.refresh_interval_s.unwrap_or(6.0);
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs_f64(interval_s)) => {}
            }
            let mut guard = manifest.lock().await;
            if guard.presentation_timeline.static_() {
                return;
            }
            let failed = self.update_once(&mut guard, &master_uri, &mut state).await.is_err();
            drop(guard);
            if failed {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_media_stream(
        &self,
        id: &str,
        playlist_uri: &Url,
        codecs: String,
        kind: StreamKind,
        language: Option<String>,
        probe_for_baseline: bool,
        playlist_start_time_s: &mut Option<f64>,
        stream_anchors: &mut HashMap<String, (u32, f64)>,
    ) -> Result<BuiltMediaStream> {
        let text = self.fetch_text(playlist_uri.as_str()).await?;
        if playlist::classify(&text)? != playlist::PlaylistKind::Media {
            return Err(ManifestError::HlsInvalidPlaylistHierarchy(format!(
                "{playlist_uri} is a master playlist where a media playlist was expected"
            )));
        }
        let media = playlist::parse_media(&text)?;
        if media.segments.is_empty() {
            return Err(ManifestError::HlsInternalSkipStream(format!(
                "media playlist {playlist_uri} has no segments"
            )));
        }
        if media
            .segments
            .iter()
            .any(|s| s.key.as_ref().map(|k| k.method == "AES-128").unwrap_or(false))
        {
            return Err(ManifestError::HlsAes128EncryptionNotSupported);
        }

        let first = &media.segments[0];
        let first_uri = resolve_uri(playlist_uri, &first.uri)?;

        if probe_for_baseline && playlist_start_time_s.is_none() {
            if start_time::classify_container(first_uri.as_str()).is_none() {
                return Err(ManifestError::HlsInternalSkipStream(format!(
                    "cannot classify the container of {first_uri} to probe a start time"
                )));
            }
            let init_bytes = match &first.map {
                Some(map) => Some(self.fetch_init_bytes(playlist_uri, map).await?),
                None => None,
            };
            let segment_bytes = self.fetch_probe_bytes(&first_uri, first.byterange).await?;
            let probed = start_time::probe_start_time_s(first_uri.as_str(), init_bytes.as_deref(), &segment_bytes)
                .map_err(|_| ManifestError::HlsCouldNotParseSegmentStartTime)?;
            *playlist_start_time_s = Some(probed);
        }
        let baseline = playlist_start_time_s.unwrap_or(0.0);

        let mime_type = mime_type_for(kind, first_uri.as_str())?;

        // Anchor the cumulative EXTINF sum to where the last fetch of this
        // stream left off, so a refresh whose MEDIA-SEQUENCE has advanced
        // past evicted segments doesn't restart the clock at 0.
        let segment0_start_s = match stream_anchors.get(id) {
            Some(&(last_position, last_end_s)) => {
                let anchor_local_index =
                    ((last_position as u64 + 1).saturating_sub(media.media_sequence) as usize).min(media.segments.len());
                let sum: f64 = media.segments[..anchor_local_index].iter().map(|s| s.duration_s).sum();
                last_end_s - sum
            }
            None => baseline,
        };

        let mut init_cache: HashMap<playlist::InitSegmentTag, Arc<InitSegmentReference>> = HashMap::new();
        let mut refs = Vec::with_capacity(media.segments.len());
        let mut cursor_s = 0.0f64;
        for (i, seg) in media.segments.iter().enumerate() {
            let uri = resolve_uri(playlist_uri, &seg.uri)?.to_string();
            let init_ref = match &seg.map {
                Some(map) => Some(get_or_build_init_ref(&mut init_cache, playlist_uri, map)?),
                None => None,
            };
            let start_s = segment0_start_s + cursor_s;
            let end_s = start_s + seg.duration_s;
            cursor_s += seg.duration_s;
            let position = (media.media_sequence + i as u64) as u32;
            refs.push(SegmentReference::new(
                position,
                start_s,
                end_s,
                vec![uri],
                seg.byterange.map(|b| b.0).unwrap_or(0),
                seg.byterange.map(|b| b.1),
                init_ref,
                baseline,
                0.0,
                f64::INFINITY,
            ));
        }
        let end_s = refs.last().map(|r| r.end_time_s).unwrap_or(segment0_start_s);
        if let Some(last) = refs.last() {
            stream_anchors.insert(id.to_string(), (last.position, last.end_time_s));
        }

        let date_ranges = media
            .date_ranges
            .iter()
            .map(|d| TimelineRegion {
                id: Some(d.id.clone()),
                scheme_id_uri: d.scte35_out.as_ref().map(|_| "urn:scte:scte35:2013:bin".to_string()),
                start_time_s: d.start_date.map(|dt| dt.timestamp() as f64).unwrap_or(baseline),
                duration_s: d.duration_s.or(d.planned_duration_s),
                class_name: d.class.clone(),
                payload: d.scte35_out.clone(),
            })
            .collect();

        let mut stream = Stream::new(id.to_string(), mime_type, codecs, kind, SegmentIndex::from_refs(refs), None);
        stream.language = language;

        Ok(BuiltMediaStream {
            stream,
            is_vod: media.is_vod(),
            target_duration_s: media.target_duration_s,
            end_s,
            date_ranges,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn get_or_build_audio_stream(
        &self,
        cache: &mut HashMap<String, Option<Arc<Stream>>>,
        base: &Url,
        group: &str,
        member: &playlist::MediaTag,
        accum: &mut Accumulators,
        playlist_start_time_s: &mut Option<f64>,
        stream_anchors: &mut HashMap<String, (u32, f64)>,
        warnings: &mut Warnings,
    ) -> Result<Option<Arc<Stream>>> {
        if let Some(existing) = cache.get(group) {
            return Ok(existing.clone());
        }
        let Some(uri) = &member.uri else {
            cache.insert(group.to_string(), None);
            return Ok(None);
        };
        let abs = resolve_uri(base, uri)?;
        let id = format!("audio-{group}-{}", member.name);
        let result = match self
            .build_media_stream(
                &id,
                &abs,
                HLS_DEFAULT_CODECS.to_string(),
                StreamKind::Audio,
                member.language.clone(),
                true,
                playlist_start_time_s,
                stream_anchors,
            )
            .await
        {
            Ok(built) => {
                accum.fold(&built);
                Some(Arc::new(built.stream))
            }
            Err(ManifestError::HlsInternalSkipStream(msg)) => {
                warnings.push(format!("skipping audio rendition {id}: {msg}"));
                None
            }
            Err(e) => return Err(e),
        };
        cache.insert(group.to_string(), result.clone());
        Ok(result)
    }

    async fn fetch_text(&self, uri: &str) -> Result<String> {
        let resp = self.fetcher.fetch(&[uri.to_string()], None, &RetryParams::default()).run().await?;
        String::from_utf8(resp.bytes.to_vec())
            .map_err(|e| ManifestError::Other(anyhow::anyhow!("playlist at {uri} is not valid UTF-8: {e}")))
    }

    async fn fetch_probe_bytes(&self, uri: &Url, byterange: Option<(u64, u64)>) -> Result<bytes::Bytes> {
        if let Some((start, end)) = byterange {
            let resp = self
                .fetcher
                .fetch(&[uri.to_string()], Some((start, Some(end))), &RetryParams::default())
                .run()
                .await?;
            return Ok(resp.bytes);
        }
        let partial = self
            .fetcher
            .fetch(
                &[uri.to_string()],
                Some((0, Some(start_time::PROBE_RANGE_BYTES - 1))),
                &RetryParams::default(),
            )
            .run()
            .await;
        match partial {
            Ok(resp) => Ok(resp.bytes),
            Err(_) => {
                let resp = self.fetcher.fetch(&[uri.to_string()], None, &RetryParams::default()).run().await?;
                Ok(resp.bytes)
            }
        }
    }

    async fn fetch_init_bytes(&self, playlist_uri: &Url, map: &playlist::InitSegmentTag) -> Result<bytes::Bytes> {
        let uri = resolve_uri(playlist_uri, &map.uri)?;
        let (start, end) = match map.byterange {
            Some((s, e)) => (s, Some(e)),
            None => (0, None),
        };
        self.fetcher.fetch_init_segment(&[uri.to_string()], start, end).run().await
    }
}

struct BuiltMediaStream {
    stream: Stream,
    is_vod: bool,
    target_duration_s: f64,
    end_s: f64,
    date_ranges: Vec<TimelineRegion>,
}

struct Accumulators {
    any_vod: bool,
    max_target_duration_s: f64,
    min_target_duration_s: f64,
    max_end_s: f64,
    regions: Vec<TimelineRegion>,
}

impl Default for Accumulators {
    fn default() -> Self {
        Accumulators {
            any_vod: true,
            max_target_duration_s: 0.0,
            min_target_duration_s: f64::INFINITY,
            max_end_s: 0.0,
            regions: Vec::new(),
        }
    }
}

impl Accumulators {
    fn fold(&mut self, built: &BuiltMediaStream) {
        self.any_vod &= built.is_vod;
        self.max_target_duration_s = self.max_target_duration_s.max(built.target_duration_s);
        self.min_target_duration_s = self.min_target_duration_s.min(built.target_duration_s);
        self.max_end_s = self.max_end_s.max(built.end_s);
        self.regions.extend(built.date_ranges.iter().cloned());
    }
}

fn mime_type_for(kind: StreamKind, uri: &str) -> Result<String> {
    if let Some(m) = guess_mime_type_from_uri(uri) {
        return Ok(m.to_string());
    }
    match kind {
        StreamKind::Audio => Ok("audio/mp2t".to_string()),
        StreamKind::Video => Ok("video/mp2t".to_string()),
        StreamKind::Text | StreamKind::ClosedCaption => Err(ManifestError::HlsCouldNotGuessMimeType),
    }
}

fn get_or_build_init_ref(
    cache: &mut HashMap<playlist::InitSegmentTag, Arc<InitSegmentReference>>,
    playlist_uri: &Url,
    map: &Arc<playlist::InitSegmentTag>,
) -> Result<Arc<InitSegmentReference>> {
    if let Some(existing) = cache.get(map.as_ref()) {
        return Ok(existing.clone());
    }
    let uri = resolve_uri(playlist_uri, &map.uri)?;
    let (start, end) = match map.byterange {
        Some((s, e)) => (s, Some(e)),
        None => (0, None),
    };
    let init_ref = Arc::new(InitSegmentReference::new(vec![uri.to_string()], start, end));
    cache.insert((**map).clone(), init_ref.clone());
    Ok(init_ref)
}

/// Build the `GROUP-ID -> {INSTREAM-ID -> LANGUAGE}` map used to populate a
/// video stream's `closed_captions`, plus one text stream per distinct
/// `INSTREAM-ID` across the whole master playlist (spec §8 scenario 3).
fn build_closed_caption_groups(
    cc_media: &[&playlist::MediaTag],
) -> (HashMap<String, BTreeMap<String, String>>, Vec<Arc<Stream>>) {
    let mut cc_map: HashMap<String, BTreeMap<String, String>> = HashMap::new();
    let mut by_instream_id: BTreeMap<String, String> = BTreeMap::new();
    for m in cc_media {
        let Some(instream_id) = &m.instream_id else { continue };
        let lang = m.language.clone().unwrap_or_default();
        cc_map.entry(m.group_id.clone()).or_default().insert(instream_id.clone(), lang.clone());
        by_instream_id.entry(instream_id.clone()).or_insert(lang);
    }
    let streams = by_instream_id
        .into_iter()
        .map(|(instream_id, lang)| {
            let mut s = Stream::new(
                instream_id,
                "application/cc".to_string(),
                String::new(),
                StreamKind::ClosedCaption,
                SegmentIndex::new(),
                None,
            );
            s.language = Some(lang);
            Arc::new(s)
        })
        .collect();
    (cc_map, streams)
}

fn all_streams(period: &Period) -> impl Iterator<Item = &Arc<Stream>> {
    period
        .variants
        .iter()
        .flat_map(|v| v.audio.iter().chain(v.video.iter()))
        .chain(period.text_streams.iter())
}

fn merge_period_streams_by_id(existing: &Period, new: &Period, segments_added: &mut usize, warnings: &mut Warnings) {
    for new_stream in all_streams(new) {
        if let Some(existing_stream) = all_streams(existing).find(|s| s.id == new_stream.id) {
            let new_refs: Vec<_> = new_stream.segment_index.lock().unwrap().iter().cloned().collect();
            *segments_added += new_refs.len();
            existing_stream.segment_index.lock().unwrap().merge(new_refs, warnings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use crate::registry::PermissiveRegistry;
    use crate::scheduler::Op;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeFetcher {
        files: StdMutex<StdHashMap<String, Vec<u8>>>,
    }

    impl FakeFetcher {
        fn new(files: Vec<(String, Vec<u8>)>) -> Self {
            FakeFetcher {
                files: StdMutex::new(files.into_iter().collect()),
            }
        }

        fn set(&self, uri: &str, data: Vec<u8>) {
            self.files.lock().unwrap().insert(uri.to_string(), data);
        }
    }

    impl Fetcher for FakeFetcher {
        fn fetch<'a>(
            &'a self,
            uris: &'a [String],
            byte_range: Option<(u64, Option<u64>)>,
            _retry: &'a RetryParams,
        ) -> Op<FetchResponse> {
            let token = CancellationToken::new();
            let uri = uris[0].clone();
            let data = self.files.lock().unwrap().get(&uri).cloned();
            Op::new(token, async move {
                let bytes = data.ok_or_else(|| ManifestError::HttpError(format!("404 {uri}")))?;
                let sliced = match byte_range {
                    Some((start, end)) => {
                        let end = end.map(|e| (e as usize + 1).min(bytes.len())).unwrap_or(bytes.len());
                        bytes.get(start as usize..end).unwrap_or(&[]).to_vec()
                    }
                    None => bytes,
                };
                Ok(FetchResponse { bytes: sliced.into(), final_uri: uri, headers: StdHashMap::new() })
            })
        }

        fn fetch_init_segment<'a>(&'a self, uris: &'a [String], start: u64, end: Option<u64>) -> Op<bytes::Bytes> {
            let token = CancellationToken::new();
            let uri = uris[0].clone();
            let data = self.files.lock().unwrap().get(&uri).cloned();
            Op::new(token, async move {
                let bytes = data.ok_or_else(|| ManifestError::HttpError(format!("404 {uri}")))?;
                let end = end.map(|e| (e as usize + 1).min(bytes.len())).unwrap_or(bytes.len());
                Ok(bytes::Bytes::from(bytes.get(start as usize..end).unwrap_or(&[]).to_vec()))
            })
        }
    }

    fn bump_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn mp4_fragment(timescale: u32, base_decode_time: u64) -> Vec<u8> {
        let mut mdhd_body = vec![0u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        mdhd_body.extend_from_slice(&timescale.to_be_bytes());
        let mdhd = bump_box(b"mdhd", &mdhd_body);
        let mdia = bump_box(b"mdia", &mdhd);
        let trak = bump_box(b"trak", &mdia);
        let moov = bump_box(b"moov", &trak);

        let mut tfdt_body = vec![1u8, 0, 0, 0];
        tfdt_body.extend_from_slice(&base_decode_time.to_be_bytes());
        let tfdt = bump_box(b"tfdt", &tfdt_body);
        let traf = bump_box(b"traf", &tfdt);
        let moof = bump_box(b"moof", &traf);

        let mut data = moov;
        data.extend_from_slice(&moof);
        data
    }

    fn media_playlist_text(media_sequence: u64, count: usize, vod: bool) -> String {
        let mut text = format!("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:{media_sequence}\n");
        for i in 0..count {
            text.push_str(&format!("#EXTINF:4.0,\nseg{}.m4s\n", media_sequence as usize + i));
        }
        if vod {
            text.push_str("#EXT-X-ENDLIST\n");
        }
        text
    }

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aac\",NAME=\"English\",LANGUAGE=\"en\",URI=\"audio.m3u8\",DEFAULT=YES\n\
#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS,GROUP-ID=\"cc\",NAME=\"English\",LANGUAGE=\"en\",INSTREAM-ID=\"CC1\"\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,CODECS=\"avc1.4d401f,mp4a.40.2\",RESOLUTION=1280x720,AUDIO=\"aac\",CLOSED-CAPTIONS=\"cc\"\n\
video.m3u8\n";

    fn base_files() -> Vec<(String, Vec<u8>)> {
        let mut files = vec![
            ("https://example.com/master.m3u8".to_string(), MASTER.as_bytes().to_vec()),
            (
                "https://example.com/video.m3u8".to_string(),
                media_playlist_text(0, 3, true).into_bytes(),
            ),
            (
                "https://example.com/audio.m3u8".to_string(),
                media_playlist_text(0, 3, true).into_bytes(),
            ),
        ];
        for i in 0..3 {
            files.push((
                format!("https://example.com/seg{i}.m4s"),
                mp4_fragment(1000, i as u64 * 4000),
            ));
        }
        files
    }

    #[tokio::test]
    async fn parses_vod_master_with_audio_group_and_closed_captions() {
        let fetcher = Arc::new(FakeFetcher::new(base_files()));
        let parser = HlsParser::new(fetcher, Arc::new(PermissiveRegistry));
        let manifest = parser.parse("https://example.com/master.m3u8").await.unwrap();

        assert_eq!(manifest.periods.len(), 1);
        let period = &manifest.periods[0];
        assert_eq!(period.variants.len(), 1);
        let variant = &period.variants[0];
        assert!(variant.video.is_some());
        assert!(variant.audio.is_some());
        assert_eq!(period.text_streams.len(), 1);
        assert_eq!(period.text_streams[0].id, "CC1");
        assert_eq!(
            variant.video.as_ref().unwrap().closed_captions.get("CC1").map(String::as_str),
            Some("en")
        );
        assert!(!manifest.presentation_timeline.is_live());
        let video = variant.video.as_ref().unwrap();
        assert_eq!(video.segment_index.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn live_update_merges_overlapping_media_sequence() {
        const LIVE_MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f,mp4a.40.2\"\n\
video.m3u8\n";
        let mut files = vec![("https://example.com/master.m3u8".to_string(), LIVE_MASTER.as_bytes().to_vec())];
        files.push((
            "https://example.com/video.m3u8".to_string(),
            media_playlist_text(10, 4, false).into_bytes(),
        ));
        for i in 10..14 {
            files.push((
                format!("https://example.com/seg{i}.m4s"),
                mp4_fragment(1000, (i - 10) as u64 * 4000),
            ));
        }
        let fetcher = Arc::new(FakeFetcher::new(files));
        let parser = HlsParser::new(fetcher.clone(), Arc::new(PermissiveRegistry));

        let mut state = HlsParseState::default();
        let mut manifest = parser
            .parse_with_state("https://example.com/master.m3u8", &mut state)
            .await
            .unwrap();
        assert!(manifest.presentation_timeline.is_live());
        {
            let video = manifest.periods[0].variants[0].video.as_ref().unwrap();
            assert_eq!(video.segment_index.lock().unwrap().len(), 4);
        }

        fetcher.set("https://example.com/video.m3u8", media_playlist_text(12, 4, false).into_bytes());
        for i in 14..16 {
            fetcher.set(
                &format!("https://example.com/seg{i}.m4s"),
                mp4_fragment(1000, (i - 10) as u64 * 4000),
            );
        }

        parser
            .update_once(&mut manifest, "https://example.com/master.m3u8", &mut state)
            .await
            .unwrap();
        let video = manifest.periods[0].variants[0].video.as_ref().unwrap();
        let idx = video.segment_index.lock().unwrap();
        assert_eq!(idx.len(), 6);
        assert!(idx.get(10).is_some());
        assert!(idx.get(15).is_some());
    }
}
