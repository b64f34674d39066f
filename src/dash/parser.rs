//! Top-level DASH driver (C10): fetch the MPD, resolve xlinks, build periods
//! and variants, and drive live updates.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::dash::context::InheritanceFrame;
use crate::dash::segment_builders::{self, BuildParams};
use crate::dash::xlink;
use crate::dash::xml::{self, AdaptationSet, Representation, MPD};
use crate::error::{ManifestError, Result, Warnings};
use crate::fetch::{Fetcher, RetryParams};
use crate::manifest_utils::resolve_uri;
use crate::model::{
    Manifest, ManifestUpdate, Period, PresentationTimeline, SegmentIndex, Stream, StreamKind,
    Variant,
};
use crate::registry::Registry;

/// Deserialize a resolved MPD document, annotating any failure with the
/// element/attribute path `serde_path_to_error` recovered (`quick_xml::de`'s
/// own error otherwise just names a byte offset, unhelpful for a manifest
/// that's gone through xlink splicing).
fn parse_mpd_xml(xml_text: &str) -> Result<MPD> {
    let mut de = quick_xml::de::Deserializer::from_str(xml_text);
    serde_path_to_error::deserialize(&mut de)
        .map_err(|e| ManifestError::Xml(format!("at {}: {}", e.path(), e.into_inner())))
}

/// Drives a single DASH presentation: initial parse plus (for `type="dynamic"`
/// MPDs) periodic refreshes merged into the existing per-stream
/// `SegmentIndex`es.
pub struct DashParser {
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<dyn Registry>,
}

impl DashParser {
    pub fn new(fetcher: Arc<dyn Fetcher>, registry: Arc<dyn Registry>) -> Self {
        DashParser { fetcher, registry }
    }

    /// Fetch and parse `manifest_uri` into a complete `Manifest`.
    pub async fn parse(&self, manifest_uri: &str) -> Result<Manifest> {
        Ok(self.parse_with_update_period(manifest_uri).await?.0)
    }

    /// Like [`Self::parse`], but also returns the MPD's `minimumUpdatePeriod`
    /// (in seconds), so a caller driving [`Self::run_live_updates`] doesn't
    /// have to separately fetch and parse the raw XML to find it.
    pub async fn parse_with_update_period(&self, manifest_uri: &str) -> Result<(Manifest, Option<f64>)> {
        let mut warnings = Warnings::default();
        let base = Url::parse(manifest_uri)?;
        let response = self
            .fetcher
            .fetch(&[manifest_uri.to_string()], None, &RetryParams::default())
            .run()
            .await?;
        let xml_text = String::from_utf8(response.bytes.to_vec())
            .map_err(|e| ManifestError::DashInvalidXml(format!("MPD is not valid UTF-8: {e}")))?;
        let resolved = xlink::resolve_document(&xml_text, &base, self.fetcher.as_ref(), true, &mut warnings).await?;
        let mpd: MPD = parse_mpd_xml(&resolved)?;
        let update_period_s = mpd
            .minimumUpdatePeriod
            .as_deref()
            .and_then(|s| xml::parse_xs_duration(s).ok())
            .map(|d| d.as_secs_f64());
        let manifest = self.build_manifest(&mpd, &base, &mut warnings).await?;
        Ok((manifest, update_period_s))
    }

    /// Re-fetch `manifest_uri`: merge any newly discovered segment references
    /// into the matching streams of `manifest` (looked up by
    /// `(period.id, representation.id)`), and append any newly appeared live
    /// period after running it through the registry's new-period filter.
    /// Update-time failures are demoted to recoverable per the propagation
    /// policy, never aborting the caller's live loop.
    pub async fn update_once(&self, manifest: &mut Manifest, manifest_uri: &str) -> Result<ManifestUpdate> {
        let fresh = match self.parse(manifest_uri).await {
            Ok(m) => m,
            Err(e) => return Err(e.demote_for_update()),
        };
        let new_duration_s = fresh.presentation_timeline.duration_s();

        let mut warnings = Warnings::default();
        let mut segments_added = 0usize;
        for mut new_period in fresh.periods {
            let existing_idx = manifest.periods.iter().position(|p| p.id == new_period.id);
            match existing_idx {
                Some(idx) => {
                    merge_period_streams(&manifest.periods[idx], &new_period, &mut segments_added, &mut warnings);
                }
                None => {
                    self.registry.filter_new_period(&mut new_period);
                    manifest.periods.push(new_period);
                }
            }
        }

        Ok(ManifestUpdate {
            segments_added,
            segments_evicted: 0,
            new_duration_s: Some(new_duration_s),
        })
    }

    /// Run the live-update loop until `stop` is cancelled: sleep for
    /// `minimum_update_period_s`, reparse, merge, and repeat; a failed update
    /// retries after a short 0.1s backoff rather than tearing down the loop.
    pub async fn run_live_updates(
        &self,
        manifest_uri: String,
        manifest: Arc<tokio::sync::Mutex<Manifest>>,
        minimum_update_period_s: f64,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_secs_f64(minimum_update_period_s)) => {}
            }
            let mut guard = manifest.lock().await;
            let failed = self.update_once(&mut guard, &manifest_uri).await.is_err();
            drop(guard);
            if failed {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                }
            }
        }
    }

    async fn build_manifest(&self, mpd: &MPD, base: &Url, warnings: &mut Warnings) -> Result<Manifest> {
        let is_dynamic = mpd.mpdtype.as_deref() == Some("dynamic");
        let mut timeline = PresentationTimeline::new(
            mpd.availabilityStartTime.as_deref().and_then(parse_availability_start),
            0.0,
            !is_dynamic,
        );
        if let Some(d) = mpd.mediaPresentationDuration {
            timeline.set_duration(d.as_secs_f64());
        }

        let mpd_base = match mpd.base_urls.as_ref().and_then(|v| v.first()) {
            Some(b) => resolve_uri(base, &b.base).unwrap_or_else(|_| base.clone()),
            None => base.clone(),
        };

        let mut periods = Vec::with_capacity(mpd.periods.len());
        let mut cumulative_start_s = 0.0_f64;

        for (i, p) in mpd.periods.iter().enumerate() {
            let start_s = p
                .start
                .as_deref()
                .and_then(|s| xml::parse_xs_duration(s).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(cumulative_start_s);
            let explicit_duration_s = p.duration.map(|d| d.as_secs_f64());
            let next_start_s = mpd.periods.get(i + 1).and_then(|np| {
                np.start
                    .as_deref()
                    .and_then(|s| xml::parse_xs_duration(s).ok())
                    .map(|d| d.as_secs_f64())
            });
            let end_s = match explicit_duration_s {
                Some(d) => start_s + d,
                None => next_start_s.unwrap_or_else(|| timeline.duration_s()),
            };
            cumulative_start_s = end_s;

            let period_base = match &p.BaseURL {
                Some(b) => resolve_uri(&mpd_base, &b.base).unwrap_or_else(|_| mpd_base.clone()),
                None => mpd_base.clone(),
            };

            let period_id = p.id.clone().unwrap_or_else(|| format!("period-{i}"));
            let mut model_period = Period::new(period_id, start_s);

            for aset in &p.adaptations {
                let aset_base = match &aset.BaseURL {
                    Some(b) => resolve_uri(&period_base, &b.base).unwrap_or_else(|_| period_base.clone()),
                    None => period_base.clone(),
                };

                let mut audio_streams = Vec::new();
                let mut video_streams = Vec::new();

                for rep in &aset.representations {
                    let rep_base = match &rep.BaseURL {
                        Some(b) => resolve_uri(&aset_base, &b.base).unwrap_or_else(|_| aset_base.clone()),
                        None => aset_base.clone(),
                    };
                    let frame = InheritanceFrame::new(rep, aset, p);
                    let mime = frame.mime_type().unwrap_or("").to_string();
                    let stream = self
                        .build_stream(rep, aset, p, &rep_base, &mime, start_s, end_s)
                        .await?;
                    let stream = Arc::new(stream);
                    match stream.kind {
                        StreamKind::Audio => audio_streams.push(stream),
                        StreamKind::Video => video_streams.push(stream),
                        StreamKind::Text | StreamKind::ClosedCaption => model_period.text_streams.push(stream),
                    }
                }

                fuse_variants(aset, &audio_streams, &video_streams, self.registry.as_ref(), &mut model_period.variants);
            }

            periods.push(model_period);
        }

        self.registry.filter_all_periods(&mut periods);

        let delay_s = mpd
            .suggestedPresentationDelay
            .as_deref()
            .and_then(|s| xml::parse_xs_duration(s).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(2.0 * timeline.max_segment_duration_s());
        timeline.set_delay(delay_s);

        if let Some(tsbd) = mpd
            .timeShiftBufferDepth
            .as_deref()
            .and_then(|s| xml::parse_xs_duration(s).ok())
        {
            timeline.set_segment_availability_duration(tsbd.as_secs_f64());
        }

        let mut manifest = Manifest::new(timeline);
        manifest.periods = periods;
        manifest.min_buffer_time_s = mpd
            .minBufferTime
            .as_deref()
            .and_then(|s| xml::parse_xs_duration(s).ok())
            .map(|d| d.as_secs_f64());

        if !manifest.check_period_order() {
            warnings.push("parsed periods are not in non-decreasing start-time order");
        }

        Ok(manifest)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_stream(
        &self,
        rep: &Representation,
        aset: &AdaptationSet,
        period: &xml::Period,
        base_url: &Url,
        mime_type: &str,
        period_start_s: f64,
        period_end_s: f64,
    ) -> Result<Stream> {
        let id = rep.id.clone().unwrap_or_else(|| "representation".to_string());
        let codecs = InheritanceFrame::new(rep, aset, period)
            .codecs()
            .unwrap_or("")
            .to_string();
        let kind = if mime_type.starts_with("audio") {
            StreamKind::Audio
        } else if mime_type.starts_with("video") {
            StreamKind::Video
        } else {
            StreamKind::Text
        };

        let rep_owned = rep.clone();
        let aset_owned = aset.clone();
        let period_owned = period.clone();
        let base_owned = base_url.clone();
        let bandwidth = rep.bandwidth;
        let id_for_thunk = id.clone();
        let mime_for_thunk = mime_type.to_string();
        let fetcher = self.fetcher.clone();

        let thunk: Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<SegmentIndex>> + Send>> + Send> =
            Box::new(move || {
                Box::pin(async move {
                    let frame = InheritanceFrame::new(&rep_owned, &aset_owned, &period_owned);
                    let params = BuildParams {
                        frame: &frame,
                        base_url: &base_owned,
                        representation_id: &id_for_thunk,
                        bandwidth,
                        mime_type: &mime_for_thunk,
                        period_start_s,
                        period_end_s,
                    };
                    let mut warnings = Warnings::default();
                    segment_builders::build_segment_index(&params, fetcher.as_ref(), &mut warnings).await
                })
            });

        let mut stream = Stream::new(id, mime_type.to_string(), codecs, kind, SegmentIndex::new(), Some(thunk));
        stream.language = aset.lang.clone();
        stream.bandwidth = rep.bandwidth;
        stream.width = rep.width.map(|w| w as u32);
        stream.height = rep.height.map(|h| h as u32);
        stream.frame_rate = rep.frameRate.as_deref().and_then(parse_frame_rate);
        stream.sample_rate = rep.audioSamplingRate.as_deref().and_then(|s| s.parse().ok());
        stream.channels = rep
            .AudioChannelConfiguration
            .as_ref()
            .and_then(|a| a.value.as_deref())
            .and_then(|v| v.parse().ok());
        stream.roles = convert_roles(&aset.roles);
        stream.accessibility = convert_accessibility(&aset.accessibility);
        stream.content_protection = convert_content_protection(&rep.content_protection)
            .into_iter()
            .chain(convert_content_protection(&aset.content_protection))
            .collect();
        Ok(stream)
    }
}

/// Take the Cartesian product of an AdaptationSet's audio/video
/// representations: if only one kind is present, each becomes a variant on
/// its own; otherwise every (audio, video) pair becomes a variant with summed
/// bandwidth.
fn fuse_variants(
    aset: &AdaptationSet,
    audio_streams: &[Arc<Stream>],
    video_streams: &[Arc<Stream>],
    registry: &dyn Registry,
    out: &mut Vec<Variant>,
) {
    let aset_id = aset.id.clone().unwrap_or_default();

    let mut make_variant = |audio: Option<&Arc<Stream>>, video: Option<&Arc<Stream>>| {
        let id_parts: Vec<&str> = [
            Some(aset_id.as_str()),
            audio.map(|s| s.id.as_str()),
            video.map(|s| s.id.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect();
        let mut variant = Variant::new(id_parts.join("-"));
        variant.bandwidth = match (audio, video) {
            (Some(a), Some(v)) => Some(a.bandwidth.unwrap_or(0) + v.bandwidth.unwrap_or(0)),
            (Some(a), None) => a.bandwidth,
            (None, Some(v)) => v.bandwidth,
            (None, None) => None,
        };
        variant.language = audio
            .and_then(|a| a.language.clone())
            .or_else(|| video.and_then(|v| v.language.clone()));
        let mut accepts = true;
        if let Some(a) = audio {
            accepts &= registry.accepts_content_protection(&a.content_protection);
            variant.audio = Some(a.clone());
        }
        if let Some(v) = video {
            accepts &= registry.accepts_content_protection(&v.content_protection);
            variant.video = Some(v.clone());
        }
        variant.allowed_by_key_system = accepts;
        variant
    };

    if video_streams.is_empty() {
        for a in audio_streams {
            out.push(make_variant(Some(a), None));
        }
    } else if audio_streams.is_empty() {
        for v in video_streams {
            out.push(make_variant(None, Some(v)));
        }
    } else {
        for v in video_streams {
            for a in audio_streams {
                out.push(make_variant(Some(a), Some(v)));
            }
        }
    }
}

fn merge_period_streams(existing: &Period, new: &Period, segments_added: &mut usize, warnings: &mut Warnings) {
    let mut new_streams: Vec<&Arc<Stream>> = Vec::new();
    for v in &new.variants {
        if let Some(a) = &v.audio {
            new_streams.push(a);
        }
        if let Some(vd) = &v.video {
            new_streams.push(vd);
        }
    }
    new_streams.extend(new.text_streams.iter());

    for new_stream in new_streams {
        if let Some(existing_stream) = find_stream_by_id(existing, &new_stream.id) {
            let new_refs: Vec<_> = new_stream.segment_index.lock().unwrap().iter().cloned().collect();
            *segments_added += new_refs.len();
            existing_stream.segment_index.lock().unwrap().merge(new_refs, warnings);
        }
    }
}

fn find_stream_by_id<'p>(period: &'p Period, id: &str) -> Option<&'p Arc<Stream>> {
    for v in &period.variants {
        if let Some(a) = &v.audio {
            if a.id == id {
                return Some(a);
            }
        }
        if let Some(vd) = &v.video {
            if vd.id == id {
                return Some(vd);
            }
        }
    }
    period.text_streams.iter().find(|s| s.id == id)
}

fn parse_availability_start(s: &str) -> Option<f64> {
    let dt = s.parse::<chrono::DateTime<chrono::Utc>>().ok()?;
    Some(dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1_000_000_000.0)
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => s.parse().ok(),
    }
}

fn convert_content_protection(list: &[xml::ContentProtection]) -> Vec<crate::model::ContentProtection> {
    list.iter()
        .map(|c| crate::model::ContentProtection {
            scheme_id_uri: c.schemeIdUri.clone(),
            value: c.value.clone(),
            default_kid: c.default_kid.clone(),
            pssh: c.pssh.clone(),
        })
        .collect()
}

fn convert_roles(list: &[xml::Role]) -> Vec<crate::model::Role> {
    list.iter()
        .map(|r| crate::model::Role {
            scheme_id_uri: r.schemeIdUri.clone(),
            value: r.value.clone(),
        })
        .collect()
}

fn convert_accessibility(list: &[xml::Accessibility]) -> Vec<crate::model::Accessibility> {
    list.iter()
        .map(|a| crate::model::Accessibility {
            scheme_id_uri: a.schemeIdUri.clone(),
            value: a.value.clone(),
        })
        .collect()
}
