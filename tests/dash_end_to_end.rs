//! End-to-end `DashParser` scenarios against a fake in-memory `Fetcher`,
//! matching spec §8's concrete scenarios 1 (SegmentTemplate@duration) and 5
//! (xlink depth limit).

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use manifest_core::dash::parser::DashParser;
use manifest_core::error::ManifestError;
use manifest_core::fetch::{FetchResponse, Fetcher, RetryParams};
use manifest_core::registry::PermissiveRegistry;
use manifest_core::scheduler::Op;
use tokio_util::sync::CancellationToken;

struct FakeFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeFetcher {
    fn new(files: Vec<(&str, &str)>) -> Self {
        FakeFetcher {
            files: Mutex::new(files.into_iter().map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())).collect()),
        }
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
            Ok(FetchResponse { bytes: sliced.into(), final_uri: uri, headers: HashMap::new() })
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

/// Scenario 1: one period, one representation, `SegmentTemplate@duration`,
/// `timescale=1000`, `duration=5000`, `startNumber=1`, period duration 30s
/// ⇒ exactly 6 references, positions 1..6, `[0,5) [5,10) ... [25,30)`.
#[tokio::test]
async fn dash_vod_segment_template_duration_yields_six_references() {
    common::setup_logging();

    const MPD: &str = r#"<?xml version="1.0"?>
<MPD type="static" mediaPresentationDuration="PT30S">
  <Period id="p0" duration="PT30S">
    <AdaptationSet mimeType="video/mp4" codecs="avc1.4d401f">
      <Representation id="v0" bandwidth="500000">
        <SegmentTemplate media="s$Number$.m4s" startNumber="1" duration="5000" timescale="1000"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    let fetcher = Arc::new(FakeFetcher::new(vec![("https://example.com/stream.mpd", MPD)]));
    let parser = DashParser::new(fetcher, Arc::new(PermissiveRegistry));
    let manifest = parser.parse("https://example.com/stream.mpd").await.unwrap();

    assert_eq!(manifest.periods.len(), 1);
    let period = &manifest.periods[0];
    assert_eq!(period.variants.len(), 1);
    let video = period.variants[0].video.as_ref().unwrap();
    video.create_segment_index().await.unwrap();

    let idx = video.segment_index.lock().unwrap();
    assert_eq!(idx.len(), 6);
    let expected = [
        (1u32, 0.0, 5.0),
        (2, 5.0, 10.0),
        (3, 10.0, 15.0),
        (4, 15.0, 20.0),
        (5, 20.0, 25.0),
        (6, 25.0, 30.0),
    ];
    for (i, (pos, start, end)) in expected.into_iter().enumerate() {
        let r = idx.get(pos).unwrap();
        assert_eq!(r.position, pos, "position at index {i}");
        assert_eq!(r.start_time_s, start, "start at index {i}");
        assert_eq!(r.end_time_s, end, "end at index {i}");
    }
}

/// Scenario 5: an MPD whose Period xlinks to `A`, which xlinks to `B`, ...,
/// `F` (the sixth hop) ⇒ parsing fails with `DASH_XLINK_DEPTH_LIMIT` at
/// `linkDepth >= 5`.
#[tokio::test]
async fn xlink_chain_deeper_than_five_hops_fails() {
    common::setup_logging();

    const ROOT: &str = r#"<?xml version="1.0"?>
<MPD type="static" mediaPresentationDuration="PT30S">
  <Period xlink:href="https://example.com/a.xml" xlink:actuate="onLoad"/>
</MPD>"#;

    fn hop(next: &str) -> String {
        format!(r#"<Period xlink:href="{next}" xlink:actuate="onLoad"/>"#)
    }

    let files = vec![
        ("https://example.com/stream.mpd", ROOT.to_string()),
        ("https://example.com/a.xml", hop("https://example.com/b.xml")),
        ("https://example.com/b.xml", hop("https://example.com/c.xml")),
        ("https://example.com/c.xml", hop("https://example.com/d.xml")),
        ("https://example.com/d.xml", hop("https://example.com/e.xml")),
        ("https://example.com/e.xml", hop("https://example.com/f.xml")),
        ("https://example.com/f.xml", "<Period/>".to_string()),
    ];
    let fetcher = Arc::new(FakeFetcher::new(files.iter().map(|(u, b)| (*u, b.as_str())).collect()));
    let parser = DashParser::new(fetcher, Arc::new(PermissiveRegistry));

    let err = parser.parse("https://example.com/stream.mpd").await.unwrap_err();
    assert!(matches!(err, ManifestError::DashXlinkDepthLimit(5)), "got {err:?}");
}
