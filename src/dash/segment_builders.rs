//! Converts each DASH segment-info flavor — `SegmentBase`, `SegmentList`,
//! `SegmentTemplate` — into a `SegmentIndex` (C7).

use std::sync::Arc;

use url::Url;

use crate::dash::context::InheritanceFrame;
use crate::dash::probes::{sidx, webm};
use crate::dash::segment_timeline;
use crate::error::{ManifestError, Result, Warnings};
use crate::fetch::Fetcher;
use crate::manifest_utils::resolve_uri;
use crate::model::segment_reference::{InitSegmentReference, SegmentReference};
use crate::model::segment_index::SegmentIndex;
use crate::uri_template::{fill, TemplateParams};

/// Parse a DASH `@range`/`@indexRange`/`@mediaRange` attribute: `"start-end"`
/// (end inclusive) or `"start-"` (to end of resource).
fn parse_byte_range(range: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    if end.is_empty() {
        Some((start, None))
    } else {
        Some((start, Some(end.parse().ok()?)))
    }
}

/// Everything a builder needs about the Representation being built, already
/// resolved out of the inheritance frame by the caller (C10).
pub struct BuildParams<'a> {
    pub frame: &'a InheritanceFrame<'a>,
    pub base_url: &'a Url,
    pub representation_id: &'a str,
    pub bandwidth: Option<u64>,
    pub mime_type: &'a str,
    pub period_start_s: f64,
    pub period_end_s: f64,
}

async fn fetch_init_segment(
    frame: &InheritanceFrame<'_>,
    base_url: &Url,
    fetcher: &dyn Fetcher,
) -> Result<Option<Arc<InitSegmentReference>>> {
    let init = match frame
        .segment_base()
        .and_then(|sb| sb.initialization.as_ref())
        .or_else(|| frame.segment_list().and_then(|sl| sl.initialization.as_ref()))
    {
        Some(i) => i,
        None => return Ok(None),
    };
    let source = init.sourceURL.as_deref().unwrap_or(base_url.as_str());
    let uri = resolve_uri(base_url, source)?;
    let (start, end) = init
        .range
        .as_deref()
        .and_then(parse_byte_range)
        .unwrap_or((0, None));
    Ok(Some(Arc::new(InitSegmentReference::new(vec![uri.to_string()], start, end))))
}

/// Build a `SegmentIndex` for a Representation via `SegmentBase`: a single
/// media URL plus an external index, probed via C8.
pub async fn build_segment_base(
    params: &BuildParams<'_>,
    fetcher: &dyn Fetcher,
) -> Result<SegmentIndex> {
    let sb = params
        .frame
        .segment_base()
        .ok_or(ManifestError::DashNoSegmentInfo)?;

    let is_mp4 = params.mime_type.contains("mp4");
    let is_webm = params.mime_type.contains("webm");
    if !is_mp4 && !is_webm {
        return Err(ManifestError::DashUnsupportedContainer(params.mime_type.to_string()));
    }

    let init_ref = fetch_init_segment(params.frame, params.base_url, fetcher).await?;
    if is_webm && init_ref.is_none() {
        return Err(ManifestError::DashWebmMissingInit);
    }

    let media_uri = params.base_url.clone();
    let index_range = sb.indexRange.as_deref().and_then(parse_byte_range);
    let (range_start, range_end) = index_range.unwrap_or((0, None));

    let index_bytes = fetcher
        .fetch_init_segment(&[media_uri.to_string()], range_start, range_end)
        .run()
        .await?;

    let scaled_pto = sb.presentationTimeOffset.unwrap_or(0) as f64 / sb.timescale.unwrap_or(1) as f64;
    let timestamp_offset_s = params.period_start_s - scaled_pto;

    let refs = if is_mp4 {
        sidx::parse_sidx(
            &index_bytes,
            range_end.map(|e| e + 1).unwrap_or(0),
            vec![media_uri.to_string()],
            init_ref,
            0,
            timestamp_offset_s,
            params.period_start_s,
            params.period_end_s,
        )?
    } else {
        let timescale = sb.timescale.unwrap_or(1000) as f64;
        webm::parse_cues(
            &index_bytes,
            None,
            timescale,
            vec![media_uri.to_string()],
            init_ref.expect("checked above"),
            0,
            timestamp_offset_s,
            params.period_start_s,
            params.period_end_s,
        )?
    };

    let mut index = SegmentIndex::from_refs(refs);
    index.fit(params.period_start_s, params.period_end_s);
    Ok(index)
}

/// Build a `SegmentIndex` for a Representation via `SegmentList`: an explicit
/// enumeration of `SegmentURL` children, timed either by a `SegmentTimeline`
/// or a fixed `@duration`.
pub async fn build_segment_list(
    params: &BuildParams<'_>,
    fetcher: &dyn Fetcher,
    warnings: &mut Warnings,
) -> Result<SegmentIndex> {
    let sl = params
        .frame
        .segment_list()
        .ok_or(ManifestError::DashNoSegmentInfo)?;

    let init_ref = fetch_init_segment(params.frame, params.base_url, fetcher).await?;
    let start_number = sl.startNumber.unwrap_or(1);

    let time_ranges = if let Some(tl) = &sl.segment_timeline {
        let timescale = sl.timescale.unwrap_or(1);
        segment_timeline::build(tl, timescale, 0, params.period_end_s - params.period_start_s, warnings)
    } else {
        let timescale = sl.timescale.unwrap_or(1) as f64;
        let duration_s = sl.duration.map(|d| d as f64 / timescale).unwrap_or(0.0);
        if duration_s <= 0.0 {
            return Err(ManifestError::DashNoSegmentInfo);
        }
        (0..sl.segment_urls.len())
            .map(|i| crate::model::segment_reference::TimeRange {
                start_s: i as f64 * duration_s,
                end_s: (i + 1) as f64 * duration_s,
                unscaled_start: (i as f64 * duration_s * timescale) as u64,
            })
            .collect()
    };

    let count = time_ranges.len().min(sl.segment_urls.len());
    if time_ranges.len() != sl.segment_urls.len() {
        warnings.push(format!(
            "SegmentList has {} SegmentURL children but {} timeline entries; truncating to {count}",
            sl.segment_urls.len(),
            time_ranges.len()
        ));
    }

    let mut refs = Vec::with_capacity(count);
    for (i, (range, url)) in time_ranges.into_iter().zip(sl.segment_urls.iter()).take(count).enumerate() {
        let media = url.media.as_deref().ok_or(ManifestError::DashNoSegmentInfo)?;
        let uri = resolve_uri(params.base_url, media)?;
        let (start_byte, end_byte) = url
            .mediaRange
            .as_deref()
            .and_then(parse_byte_range)
            .unwrap_or((0, None));
        refs.push(SegmentReference::new(
            start_number as u32 + i as u32,
            params.period_start_s + range.start_s,
            params.period_start_s + range.end_s,
            vec![uri.to_string()],
            start_byte,
            end_byte,
            init_ref.clone(),
            params.period_start_s,
            params.period_start_s,
            params.period_end_s,
        ));
    }

    let mut index = SegmentIndex::from_refs(refs);
    index.fit(params.period_start_s, params.period_end_s);
    Ok(index)
}

/// Build a `SegmentIndex` for a Representation via `SegmentTemplate`, in one
/// of its three mutually-exclusive modes: index-template, timeline-driven,
/// or fixed-duration (precedence in that order, per spec §4.4).
pub async fn build_segment_template(
    params: &BuildParams<'_>,
    fetcher: &dyn Fetcher,
    warnings: &mut Warnings,
) -> Result<SegmentIndex> {
    let st = params
        .frame
        .segment_template()
        .ok_or(ManifestError::DashNoSegmentInfo)?;

    let start_number = st.startNumber.unwrap_or(1);
    let timescale = st.timescale.unwrap_or(1);
    let unscaled_pto = st.presentationTimeOffset.unwrap_or(0) as i64;
    let scaled_pto = unscaled_pto as f64 / timescale as f64;
    let timestamp_offset_s = params.period_start_s - scaled_pto;

    let mut template_params = TemplateParams {
        representation_id: Some(params.representation_id),
        bandwidth: params.bandwidth,
        ..Default::default()
    };

    if let Some(index_template) = &st.index {
        template_params.number = Some(start_number);
        let filled = fill(index_template, &template_params, warnings);
        let media_template = st.media.as_deref().unwrap_or(&filled);
        let media_filled = fill(media_template, &template_params, warnings);
        let index_uri = resolve_uri(params.base_url, &filled)?;
        let media_uri = resolve_uri(params.base_url, &media_filled)?;
        let init_ref = fetch_init_segment_for_template(params, fetcher, &template_params, warnings).await?;
        let index_bytes = fetcher.fetch_init_segment(&[index_uri.to_string()], 0, None).run().await?;
        let refs = sidx::parse_sidx(
            &index_bytes,
            0,
            vec![media_uri.to_string()],
            init_ref,
            start_number as u32,
            timestamp_offset_s,
            params.period_start_s,
            params.period_end_s,
        )?;
        let mut index = SegmentIndex::from_refs(refs);
        index.fit(params.period_start_s, params.period_end_s);
        return Ok(index);
    }

    let init_ref = fetch_init_segment_for_template(params, fetcher, &template_params, warnings).await?;

    if let Some(timeline) = &st.SegmentTimeline {
        let period_duration = params.period_end_s - params.period_start_s;
        let ranges = segment_timeline::build(timeline, timescale, unscaled_pto, period_duration, warnings);
        let mut refs = Vec::with_capacity(ranges.len());
        for (i, range) in ranges.iter().enumerate() {
            let position = start_number + i as u64;
            let mut p = template_params.clone();
            p.number = Some(position);
            // §4.4: the `media` template's $Time$ is filled with the original
            // (PTO-inclusive) `<S t>` value, not `segment_timeline::build`'s
            // PTO-subtracted `unscaled_start`.
            p.time = Some(range.unscaled_start as f64 + unscaled_pto as f64);
            let media = st.media.as_deref().ok_or(ManifestError::DashNoSegmentInfo)?;
            let filled = fill(media, &p, warnings);
            let uri = resolve_uri(params.base_url, &filled)?;
            refs.push(SegmentReference::new(
                position as u32,
                params.period_start_s + range.start_s,
                params.period_start_s + range.end_s,
                vec![uri.to_string()],
                0,
                None,
                init_ref.clone(),
                timestamp_offset_s,
                params.period_start_s,
                params.period_end_s,
            ));
        }
        let mut index = SegmentIndex::from_refs(refs);
        index.fit(params.period_start_s, params.period_end_s);
        return Ok(index);
    }

    // Fixed-duration mode.
    let duration_units = st.duration.ok_or(ManifestError::DashNoSegmentInfo)?;
    let duration_s = duration_units as f64 / timescale as f64;
    if duration_s <= 0.0 {
        return Err(ManifestError::DashNoSegmentInfo);
    }
    let period_duration = params.period_end_s - params.period_start_s;
    let segment_count = if period_duration.is_finite() {
        (period_duration / duration_s).ceil() as u64
    } else {
        1
    };

    let mut refs = Vec::with_capacity(segment_count as usize);
    for i in 0..segment_count {
        let position = start_number + i;
        let mut p = template_params.clone();
        p.number = Some(position);
        let media = st.media.as_deref().ok_or(ManifestError::DashNoSegmentInfo)?;
        let filled = fill(media, &p, warnings);
        let uri = resolve_uri(params.base_url, &filled)?;
        let start_s = params.period_start_s + i as f64 * duration_s;
        let end_s = (start_s + duration_s).min(params.period_end_s);
        refs.push(SegmentReference::new(
            position as u32,
            start_s,
            end_s,
            vec![uri.to_string()],
            0,
            None,
            init_ref.clone(),
            timestamp_offset_s,
            params.period_start_s,
            params.period_end_s,
        ));
    }
    let mut index = SegmentIndex::from_refs(refs);
    index.fit(params.period_start_s, params.period_end_s);
    Ok(index)
}

/// `SegmentTemplate`'s `initialization` attribute is itself a URI template
/// (filled with representation-id/bandwidth only, never `$Number$`/`$Time$`).
async fn fetch_init_segment_for_template(
    params: &BuildParams<'_>,
    fetcher: &dyn Fetcher,
    template_params: &TemplateParams<'_>,
    warnings: &mut Warnings,
) -> Result<Option<Arc<InitSegmentReference>>> {
    let st = match params.frame.segment_template() {
        Some(st) => st,
        None => return Ok(None),
    };
    let init_template = match &st.initialization {
        Some(i) => i,
        None => return Ok(None),
    };
    let filled = fill(init_template, template_params, warnings);
    let uri = resolve_uri(params.base_url, &filled)?;
    let _ = fetcher; // the init segment itself is fetched lazily by the streaming engine
    Ok(Some(Arc::new(InitSegmentReference::new(vec![uri.to_string()], 0, None))))
}

/// Dispatch to the right builder by the precedence a Representation's
/// segment-addressing elements are expected to be mutually exclusive under:
/// `SegmentTemplate` (by far the common case in live/VOD manifests in the
/// wild), then `SegmentList`, then `SegmentBase`.
pub async fn build_segment_index(
    params: &BuildParams<'_>,
    fetcher: &dyn Fetcher,
    warnings: &mut Warnings,
) -> Result<SegmentIndex> {
    if params.frame.segment_template().is_some() {
        build_segment_template(params, fetcher, warnings).await
    } else if params.frame.segment_list().is_some() {
        build_segment_list(params, fetcher, warnings).await
    } else if params.frame.segment_base().is_some() {
        build_segment_base(params, fetcher).await
    } else {
        Err(ManifestError::DashNoSegmentInfo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_parses_both_forms() {
        assert_eq!(parse_byte_range("0-999"), Some((0, Some(999))));
        assert_eq!(parse_byte_range("1000-"), Some((1000, None)));
        assert_eq!(parse_byte_range("garbage"), None);
    }
}
