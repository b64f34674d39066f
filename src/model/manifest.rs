//! Top-level presentation model: `Period`, `Variant`, `Stream`, `Manifest`,
//! and the descriptive/ad-signaling records carried alongside them.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::model::segment_index::SegmentIndex;
use crate::model::timeline::PresentationTimeline;

/// An opaque DRM signaling record. The core never attempts to decrypt or
/// interpret key material; it only carries this through to a host's
/// `Registry` filter hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentProtection {
    pub scheme_id_uri: Option<String>,
    pub value: Option<String>,
    pub default_kid: Option<String>,
    /// Base64, stored as received; never decoded by this crate.
    pub pssh: Option<String>,
}

/// DASH `<Role>`/HLS equivalent classification (e.g. `main`, `alternate`).
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accessibility {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Viewpoint {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub lang: Option<String>,
    pub text: String,
}

/// A normalized ad-marker/event-signaling region, unifying DASH
/// `EventStream`/`Event` and HLS `EXT-X-DATERANGE` into one shape for
/// downstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRegion {
    pub id: Option<String>,
    pub scheme_id_uri: Option<String>,
    pub start_time_s: f64,
    pub duration_s: Option<f64>,
    pub class_name: Option<String>,
    /// Opaque signaling payload (DASH `Event` body, HLS SCTE-35 cue, etc.),
    /// stored verbatim.
    pub payload: Option<String>,
}

/// Diagnostic summary of one parser refresh, returned so an update loop has
/// something to log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestUpdate {
    pub segments_added: usize,
    pub segments_evicted: usize,
    pub new_duration_s: Option<f64>,
}

/// The media kind of a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Text,
    /// HLS `EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS`: carried in-band in the video
    /// stream, so it has no `SegmentIndex` of its own, but is surfaced as a
    /// `Period::text_streams` entry per spec §8 scenario 3.
    ClosedCaption,
}

type CreateSegmentIndexFuture =
    Pin<Box<dyn Future<Output = crate::error::Result<SegmentIndex>> + Send>>;

/// One elementary stream within a period: a single representation's worth of
/// descriptive metadata plus its (lazily built) segment index.
pub struct Stream {
    pub id: String,
    pub mime_type: String,
    pub codecs: String,
    pub kind: StreamKind,
    pub language: Option<String>,
    pub bandwidth: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
    pub roles: Vec<Role>,
    pub accessibility: Vec<Accessibility>,
    pub content_protection: Vec<ContentProtection>,
    pub label: Option<Label>,
    /// HLS `EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS` entries carried by the variant
    /// this (video) stream belongs to, keyed by `INSTREAM-ID` (e.g. `"CC1"`)
    /// to `LANGUAGE`. Always empty for DASH-sourced streams.
    pub closed_captions: std::collections::BTreeMap<String, String>,
    pub segment_index: Mutex<SegmentIndex>,
    /// A thunk supplied by the parser that (re)builds `segment_index` the
    /// first time a consumer asks for it. Consumed by `create_segment_index`.
    create_segment_index_thunk: Mutex<Option<Box<dyn FnOnce() -> CreateSegmentIndexFuture + Send>>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("mime_type", &self.mime_type)
            .field("codecs", &self.codecs)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Stream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        mime_type: String,
        codecs: String,
        kind: StreamKind,
        segment_index: SegmentIndex,
        create_segment_index_thunk: Option<Box<dyn FnOnce() -> CreateSegmentIndexFuture + Send>>,
    ) -> Self {
        Stream {
            id,
            mime_type,
            codecs,
            kind,
            language: None,
            bandwidth: None,
            width: None,
            height: None,
            frame_rate: None,
            channels: None,
            sample_rate: None,
            roles: Vec::new(),
            accessibility: Vec::new(),
            content_protection: Vec::new(),
            label: None,
            closed_captions: std::collections::BTreeMap::new(),
            segment_index: Mutex::new(segment_index),
            create_segment_index_thunk: Mutex::new(create_segment_index_thunk),
        }
    }

    /// Build (or rebuild) this stream's segment index, if a parser supplied a
    /// thunk to do so, and install the result. Idempotent: a second call
    /// without a fresh thunk is a no-op.
    pub async fn create_segment_index(&self) -> crate::error::Result<()> {
        let thunk = self.create_segment_index_thunk.lock().unwrap().take();
        match thunk {
            Some(f) => {
                let index = f().await?;
                *self.segment_index.lock().unwrap() = index;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// A selectable rendition of a period: a bandwidth/language/role combination
/// pairing at most one audio and one video `Stream` (DASH "Adaptation Set
/// fusion" / HLS `EXT-X-STREAM-INF` variant).
#[derive(Debug)]
pub struct Variant {
    pub id: String,
    pub audio: Option<Arc<Stream>>,
    pub video: Option<Arc<Stream>>,
    pub bandwidth: Option<u64>,
    pub language: Option<String>,
    pub primary: bool,
    pub allowed_by_app: bool,
    pub allowed_by_key_system: bool,
}

impl Variant {
    pub fn new(id: String) -> Self {
        Variant {
            id,
            audio: None,
            video: None,
            bandwidth: None,
            language: None,
            primary: false,
            allowed_by_app: true,
            allowed_by_key_system: true,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed_by_app && self.allowed_by_key_system
    }
}

/// One presentation period: a set of selectable `Variant`s plus any
/// stand-alone text streams, starting at `start_time_s` within the overall
/// manifest timeline.
#[derive(Debug)]
pub struct Period {
    pub id: String,
    pub start_time_s: f64,
    pub variants: Vec<Variant>,
    pub text_streams: Vec<Arc<Stream>>,
    pub regions: Vec<TimelineRegion>,
}

impl Period {
    pub fn new(id: String, start_time_s: f64) -> Self {
        Period {
            id,
            start_time_s,
            variants: Vec::new(),
            text_streams: Vec::new(),
            regions: Vec::new(),
        }
    }
}

/// The root of a parsed presentation: an ordered list of periods sharing one
/// presentation clock.
#[derive(Debug)]
pub struct Manifest {
    pub presentation_timeline: PresentationTimeline,
    pub periods: Vec<Period>,
    pub min_buffer_time_s: Option<f64>,
    pub offline_session_ids: Vec<String>,
}

impl Manifest {
    pub fn new(presentation_timeline: PresentationTimeline) -> Self {
        Manifest {
            presentation_timeline,
            periods: Vec::new(),
            min_buffer_time_s: None,
            offline_session_ids: Vec::new(),
        }
    }

    /// Check the period-ordering invariant: period `n+1` must start at or
    /// after period `n`'s start.
    pub fn check_period_order(&self) -> bool {
        self.periods
            .windows(2)
            .all(|w| w[1].start_time_s >= w[0].start_time_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_requires_both_permissions() {
        let mut v = Variant::new("v0".into());
        v.allowed_by_key_system = false;
        assert!(!v.is_allowed());
    }

    #[test]
    fn period_order_detects_regression() {
        let mut m = Manifest::new(PresentationTimeline::new(None, 0.0, true));
        m.periods.push(Period::new("p0".into(), 0.0));
        m.periods.push(Period::new("p1".into(), 10.0));
        assert!(m.check_period_order());
        m.periods.push(Period::new("p2".into(), 5.0));
        assert!(!m.check_period_order());
    }
}
