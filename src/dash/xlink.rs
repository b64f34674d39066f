//! Recursive `xlink:href` dereferencing (C9), per spec §4.6: strip xlink
//! attributes before any retry, require `actuate=onLoad`, enforce a depth
//! limit of 5, honor the `resolve-to-zero` magic href, and skip recursing
//! into `SegmentTimeline` subtrees (which may not contain xlinks).

use std::pin::Pin;

use url::Url;

use crate::dash::xmltree::{XmlChild, XmlElement};
use crate::error::{ManifestError, Result, Warnings};
use crate::fetch::{Fetcher, RetryParams};
use crate::manifest_utils::resolve_uri;

const MAX_LINK_DEPTH: u32 = 5;
const RESOLVE_TO_ZERO_HREF: &str = "urn:mpeg:dash:resolve-to-zero:2013";

/// Parse `xml`, recursively resolve every `xlink:href`, and return the
/// recomposed document's XML text, ready to be handed to the typed MPD
/// deserializer. `fail_gracefully` controls whether an xlink failure aborts
/// the whole parse or is logged and the host element processed with its
/// xlink attributes stripped (spec §7's xlink propagation policy).
pub async fn resolve_document(
    xml: &str,
    base: &Url,
    fetcher: &dyn Fetcher,
    fail_gracefully: bool,
    warnings: &mut Warnings,
) -> Result<String> {
    let root = crate::dash::xmltree::parse(xml)?;
    let resolved = resolve_element(root, 0, base.clone(), fetcher, fail_gracefully, warnings).await?;
    let resolved = resolved.ok_or_else(|| {
        ManifestError::DashInvalidXml("root element resolved to nothing (resolve-to-zero on <MPD>?)".into())
    })?;
    Ok(crate::dash::xmltree::serialize(&resolved))
}

/// Resolve one element and, recursively, its children. Returns `None` if
/// this element (or what it dereferenced to) should be removed from the
/// tree (the `resolve-to-zero` href).
fn resolve_element<'a>(
    mut el: XmlElement,
    depth: u32,
    base: Url,
    fetcher: &'a dyn Fetcher,
    fail_gracefully: bool,
    warnings: &'a mut Warnings,
) -> Pin<Box<dyn std::future::Future<Output = Result<Option<XmlElement>>> + 'a>> {
    Box::pin(async move {
        let href = el.attr("xlink:href").map(str::to_string);
        let actuate = el.attr("xlink:actuate").map(str::to_string);
        // Strip xlink attributes unconditionally so a retried/failed pass
        // never loops back onto the same href.
        el.remove_attr("xlink:href");
        el.remove_attr("xlink:actuate");

        if let Some(href) = href {
            match resolve_href(&el, &href, actuate.as_deref(), depth, &base, fetcher, warnings).await {
                Ok(replacement) => {
                    return match replacement {
                        Some(new_el) => {
                            if new_el.tag == "SegmentTimeline" {
                                Ok(Some(new_el))
                            } else {
                                resolve_element(new_el, depth + 1, base, fetcher, fail_gracefully, warnings).await
                            }
                        }
                        None => Ok(None),
                    };
                }
                Err(e) => {
                    if fail_gracefully {
                        warnings.push(format!("xlink resolution failed, processing native contents: {e}"));
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        if el.tag == "SegmentTimeline" {
            return Ok(Some(el));
        }

        let mut children = Vec::with_capacity(el.children.len());
        for child in el.children.drain(..) {
            match child {
                XmlChild::Element(child_el) => {
                    if let Some(resolved) =
                        resolve_element(child_el, depth, base.clone(), fetcher, fail_gracefully, warnings).await?
                    {
                        children.push(XmlChild::Element(resolved));
                    }
                }
                text => children.push(text),
            }
        }
        el.children = children;
        Ok(Some(el))
    })
}

/// Dereference a single `xlink:href`, returning the element that should
/// replace `host` (sharing `host`'s tag but the loaded root's attributes and
/// children), or `None` for `resolve-to-zero`.
async fn resolve_href(
    host: &XmlElement,
    href: &str,
    actuate: Option<&str>,
    depth: u32,
    base: &Url,
    fetcher: &dyn Fetcher,
    _warnings: &mut Warnings,
) -> Result<Option<XmlElement>> {
    if href == RESOLVE_TO_ZERO_HREF {
        return Ok(None);
    }

    if actuate.unwrap_or("onRequest") != "onLoad" {
        return Err(ManifestError::DashUnsupportedXlinkActuate(
            actuate.unwrap_or("onRequest").to_string(),
        ));
    }

    if depth >= MAX_LINK_DEPTH {
        return Err(ManifestError::DashXlinkDepthLimit(MAX_LINK_DEPTH));
    }

    let target = resolve_uri(base, href)?;
    let response = fetcher
        .fetch(&[target.to_string()], None, &RetryParams::default())
        .run()
        .await?;
    let text = String::from_utf8(response.bytes.to_vec())
        .map_err(|e| ManifestError::DashInvalidXml(format!("xlink target is not valid UTF-8: {e}")))?;
    let loaded_root = crate::dash::xmltree::parse(&text)?;

    if loaded_root.tag != host.tag {
        return Err(ManifestError::DashXlinkElementMismatch {
            expected: host.tag.clone(),
            got: loaded_root.tag.clone(),
        });
    }

    Ok(Some(XmlElement {
        tag: host.tag.clone(),
        attrs: loaded_root.attrs,
        children: loaded_root.children,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResponse;
    use crate::scheduler::Op;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct FakeFetcher {
        pages: Mutex<HashMap<String, String>>,
    }

    impl Fetcher for FakeFetcher {
        fn fetch<'a>(
            &'a self,
            uris: &'a [String],
            _byte_range: Option<(u64, Option<u64>)>,
            _retry: &'a RetryParams,
        ) -> Op<FetchResponse> {
            let uri = uris[0].clone();
            let body = self.pages.lock().unwrap().get(&uri).cloned();
            Op::new(CancellationToken::new(), async move {
                match body {
                    Some(b) => Ok(FetchResponse {
                        bytes: bytes::Bytes::from(b.into_bytes()),
                        final_uri: uri,
                        headers: HashMap::new(),
                    }),
                    None => Err(ManifestError::HttpError(format!("no fixture for {uri}"))),
                }
            })
        }

        fn fetch_init_segment<'a>(
            &'a self,
            _uris: &'a [String],
            _start: u64,
            _end: Option<u64>,
        ) -> Op<bytes::Bytes> {
            Op::new(CancellationToken::new(), async { Ok(bytes::Bytes::new()) })
        }
    }

    fn fetcher_with(pages: &[(&str, &str)]) -> FakeFetcher {
        FakeFetcher {
            pages: Mutex::new(pages.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()),
        }
    }

    #[tokio::test]
    async fn resolve_to_zero_removes_element() {
        let xml = r#"<MPD><Period id="p0" xlink:href="urn:mpeg:dash:resolve-to-zero:2013" xlink:actuate="onLoad"/><Period id="p1"/></MPD>"#;
        let fetcher = fetcher_with(&[]);
        let base = Url::parse("https://example.com/manifest.mpd").unwrap();
        let mut warnings = Warnings::default();
        let out = resolve_document(xml, &base, &fetcher, false, &mut warnings).await.unwrap();
        assert!(!out.contains("p0"));
        assert!(out.contains("p1"));
    }

    #[tokio::test]
    async fn depth_limit_is_enforced() {
        // Five hops deep (A -> B -> C -> D -> E -> F) must fail at the sixth.
        let fetcher = fetcher_with(&[
            ("https://example.com/a.xml", r#"<Period xlink:href="b.xml" xlink:actuate="onLoad"/>"#),
            ("https://example.com/b.xml", r#"<Period xlink:href="c.xml" xlink:actuate="onLoad"/>"#),
            ("https://example.com/c.xml", r#"<Period xlink:href="d.xml" xlink:actuate="onLoad"/>"#),
            ("https://example.com/d.xml", r#"<Period xlink:href="e.xml" xlink:actuate="onLoad"/>"#),
            ("https://example.com/e.xml", r#"<Period xlink:href="f.xml" xlink:actuate="onLoad"/>"#),
            ("https://example.com/f.xml", r#"<Period id="deepest"/>"#),
        ]);
        let xml = r#"<MPD><Period xlink:href="a.xml" xlink:actuate="onLoad"/></MPD>"#;
        let base = Url::parse("https://example.com/manifest.mpd").unwrap();
        let mut warnings = Warnings::default();
        let err = resolve_document(xml, &base, &fetcher, false, &mut warnings).await.unwrap_err();
        assert!(matches!(err, ManifestError::DashXlinkDepthLimit(5)));
    }

    #[tokio::test]
    async fn onrequest_actuate_is_rejected() {
        let xml = r#"<MPD><Period xlink:href="a.xml"/></MPD>"#;
        let fetcher = fetcher_with(&[]);
        let base = Url::parse("https://example.com/manifest.mpd").unwrap();
        let mut warnings = Warnings::default();
        let err = resolve_document(xml, &base, &fetcher, false, &mut warnings).await.unwrap_err();
        assert!(matches!(err, ManifestError::DashUnsupportedXlinkActuate(_)));
    }

    #[tokio::test]
    async fn fail_gracefully_keeps_native_contents() {
        let xml = r#"<MPD><Period xlink:href="missing.xml" xlink:actuate="onLoad"><AdaptationSet id="native"/></Period></MPD>"#;
        let fetcher = fetcher_with(&[]);
        let base = Url::parse("https://example.com/manifest.mpd").unwrap();
        let mut warnings = Warnings::default();
        let out = resolve_document(xml, &base, &fetcher, true, &mut warnings).await.unwrap();
        assert!(out.contains("native"));
        assert!(!warnings.is_empty());
    }

    #[tokio::test]
    async fn element_tag_mismatch_is_rejected() {
        let xml = r#"<MPD><Period xlink:href="a.xml" xlink:actuate="onLoad"/></MPD>"#;
        let fetcher = fetcher_with(&[("https://example.com/a.xml", r#"<AdaptationSet id="wrong"/>"#)]);
        let base = Url::parse("https://example.com/manifest.mpd").unwrap();
        let mut warnings = Warnings::default();
        let err = resolve_document(xml, &base, &fetcher, false, &mut warnings).await.unwrap_err();
        assert!(matches!(err, ManifestError::DashXlinkElementMismatch { .. }));
    }
}
