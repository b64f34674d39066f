//! Typed `quick-xml` + `serde` deserialization of the DASH MPD tree.
//!
//! These structs are the "XML tree abstraction" the inheritance resolver
//! (`context.rs`) walks: plain optional fields rather than a generic DOM,
//! because quick-xml's serde support already gives each element's typed
//! children for free. Unknown elements/attributes are silently ignored by
//! serde, so this need not cover every field the schema defines — only the
//! ones the segment-addressing and inheritance logic consumes.

#![allow(non_snake_case)]

use serde::Deserialize;
use serde::de;
use std::time::Duration;

pub(crate) fn parse_xs_duration(s: &str) -> anyhow::Result<Duration> {
    match iso8601::duration(s) {
        Ok(iso8601::Duration::Weeks(w)) => Ok(Duration::new(w as u64 * 60 * 60 * 24 * 7, 0)),
        Ok(iso8601::Duration::YMDHMS {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
        }) => {
            let mut secs: u64 = second.into();
            secs += minute as u64 * 60;
            secs += hour as u64 * 60 * 60;
            secs += day as u64 * 60 * 60 * 24;
            secs += month as u64 * 60 * 60 * 24 * 31;
            secs += year as u64 * 60 * 60 * 24 * 31 * 365;
            Ok(Duration::new(secs, millisecond * 1_000_000))
        }
        Err(e) => Err(anyhow::anyhow!("couldn't parse xs:duration {s:?}: {e:?}")),
    }
}

fn deserialize_xs_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    match <Option<String>>::deserialize(deserializer) {
        Ok(Some(s)) => parse_xs_duration(&s).map(Some).map_err(de::Error::custom),
        Ok(None) => Ok(None),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct S {
    pub t: Option<i64>,
    pub d: Option<i64>,
    pub r: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SegmentTimeline {
    #[serde(rename = "S", default)]
    pub segments: Vec<S>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Initialization {
    pub sourceURL: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SegmentTemplate {
    pub initialization: Option<String>,
    pub media: Option<String>,
    pub index: Option<String>,
    pub SegmentTimeline: Option<SegmentTimeline>,
    pub startNumber: Option<u64>,
    pub duration: Option<u64>,
    pub timescale: Option<u64>,
    pub presentationTimeOffset: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BaseURL {
    #[serde(rename = "$text")]
    pub base: String,
    pub serviceLocation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SegmentBase {
    #[serde(rename = "Initialization")]
    pub initialization: Option<Initialization>,
    pub timescale: Option<u64>,
    pub presentationTimeOffset: Option<u64>,
    pub indexRange: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SegmentURL {
    pub media: Option<String>,
    pub mediaRange: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SegmentList {
    pub duration: Option<u64>,
    pub timescale: Option<u64>,
    pub startNumber: Option<u64>,
    #[serde(rename = "xlink:href")]
    pub href: Option<String>,
    #[serde(rename = "xlink:actuate")]
    pub actuate: Option<String>,
    #[serde(rename = "Initialization")]
    pub initialization: Option<Initialization>,
    #[serde(rename = "SegmentTimeline")]
    pub segment_timeline: Option<SegmentTimeline>,
    #[serde(rename = "SegmentURL", default)]
    pub segment_urls: Vec<SegmentURL>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AudioChannelConfiguration {
    pub schemeIdUri: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Role {
    pub schemeIdUri: String,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Accessibility {
    pub schemeIdUri: String,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Viewpoint {
    pub schemeIdUri: String,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Label {
    pub lang: Option<String>,
    #[serde(rename = "$text")]
    pub text: String,
}

/// Contains DRM signaling; this library never attempts to use the key
/// material it carries.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContentProtection {
    pub schemeIdUri: Option<String>,
    pub value: Option<String>,
    #[serde(rename = "default_KID")]
    pub default_kid: Option<String>,
    #[serde(rename = "pssh")]
    pub pssh: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Event {
    pub id: Option<String>,
    pub presentationTime: Option<i64>,
    pub duration: Option<i64>,
    #[serde(rename = "messageData")]
    pub message_data: Option<String>,
    #[serde(rename = "$text")]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EventStream {
    pub timescale: Option<u64>,
    pub schemeIdUri: Option<String>,
    #[serde(rename = "Event", default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Representation {
    pub id: Option<String>,
    pub mimeType: Option<String>,
    pub codecs: Option<String>,
    pub bandwidth: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frameRate: Option<String>,
    pub audioSamplingRate: Option<String>,
    pub BaseURL: Option<BaseURL>,
    pub AudioChannelConfiguration: Option<AudioChannelConfiguration>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    #[serde(rename = "ContentProtection", default)]
    pub content_protection: Vec<ContentProtection>,
    #[serde(rename = "xlink:href")]
    pub href: Option<String>,
    #[serde(rename = "xlink:actuate")]
    pub actuate: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdaptationSet {
    pub id: Option<String>,
    pub group: Option<i64>,
    pub contentType: Option<String>,
    pub lang: Option<String>,
    pub mimeType: Option<String>,
    pub codecs: Option<String>,
    pub BaseURL: Option<BaseURL>,
    #[serde(rename = "xlink:href")]
    pub href: Option<String>,
    #[serde(rename = "xlink:actuate")]
    pub actuate: Option<String>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    #[serde(rename = "Role", default)]
    pub roles: Vec<Role>,
    #[serde(rename = "Accessibility", default)]
    pub accessibility: Vec<Accessibility>,
    #[serde(rename = "Viewpoint", default)]
    pub viewpoints: Vec<Viewpoint>,
    #[serde(rename = "Label", default)]
    pub labels: Vec<Label>,
    #[serde(rename = "ContentProtection", default)]
    pub content_protection: Vec<ContentProtection>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Period {
    pub id: Option<String>,
    pub start: Option<String>,
    #[serde(default, deserialize_with = "deserialize_xs_duration")]
    pub duration: Option<Duration>,
    pub BaseURL: Option<BaseURL>,
    #[serde(rename = "xlink:href")]
    pub href: Option<String>,
    #[serde(rename = "xlink:actuate")]
    pub actuate: Option<String>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(rename = "AdaptationSet", default)]
    pub adaptations: Vec<AdaptationSet>,
    #[serde(rename = "EventStream", default)]
    pub event_streams: Vec<EventStream>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MPD {
    #[serde(rename = "type")]
    pub mpdtype: Option<String>,
    pub minBufferTime: Option<String>,
    pub minimumUpdatePeriod: Option<String>,
    pub suggestedPresentationDelay: Option<String>,
    pub timeShiftBufferDepth: Option<String>,
    pub availabilityStartTime: Option<String>,
    #[serde(default, deserialize_with = "deserialize_xs_duration")]
    pub mediaPresentationDuration: Option<Duration>,
    #[serde(rename = "BaseURL")]
    pub base_urls: Option<Vec<BaseURL>>,
    #[serde(rename = "Period")]
    pub periods: Vec<Period>,
}
