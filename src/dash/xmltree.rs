//! A minimal generic XML tree — "a tree with string-keyed attribute maps and
//! ordered children" per Design Notes §9 — used only as the xlink resolver's
//! working representation. Everything else in this crate parses the typed
//! `quick-xml`/`serde` structs in `dash::xml` directly; this tree exists
//! solely so xlink resolution can splice in a fetched subtree and hand the
//! recomposed document back to the typed parser.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{ManifestError, Result};

#[derive(Debug, Clone)]
pub struct XmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlChild>,
}

#[derive(Debug, Clone)]
pub enum XmlChild {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }
}

/// Parse an XML document into one root [`XmlElement`], ignoring the
/// declaration/comments/processing instructions.
pub fn parse(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = true;
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader
            .read_event()
            .map_err(|e| ManifestError::DashInvalidXml(e.to_string()))?
        {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let attrs = decode_attrs(&e)?;
                stack.push(XmlElement { tag, attrs, children: Vec::new() });
            }
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let attrs = decode_attrs(&e)?;
                let el = XmlElement { tag, attrs, children: Vec::new() };
                push_child(&mut stack, &mut root, XmlChild::Element(el));
            }
            Event::End(_) => {
                if let Some(el) = stack.pop() {
                    push_child(&mut stack, &mut root, XmlChild::Element(el));
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| ManifestError::DashInvalidXml(e.to_string()))?
                    .into_owned();
                if !text.trim().is_empty() {
                    push_text(&mut stack, &text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| ManifestError::DashInvalidXml("document has no root element".into()))
}

fn decode_attrs(e: &quick_xml::events::BytesStart) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for a in e.attributes() {
        let a = a.map_err(|e| ManifestError::DashInvalidXml(e.to_string()))?;
        let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
        let value = a
            .unescape_value()
            .map_err(|e| ManifestError::DashInvalidXml(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn push_child(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, child: XmlChild) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(child);
    } else if let XmlChild::Element(el) = child {
        *root = Some(el);
    }
}

fn push_text(stack: &mut [XmlElement], text: &str) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlChild::Text(text.to_string()));
    }
}

fn escape_attr(v: &str) -> String {
    v.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_text(v: &str) -> String {
    v.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Serialize an [`XmlElement`] back to XML text, for re-parsing by the typed
/// `quick-xml`/`serde` structs once xlink resolution has composed the final
/// document.
pub fn serialize(el: &XmlElement) -> String {
    let mut out = String::new();
    write_element(el, &mut out);
    out
}

fn write_element(el: &XmlElement, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (k, v) in &el.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape_attr(v));
        out.push('"');
    }
    if el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &el.children {
        match child {
            XmlChild::Element(e) => write_element(e, out),
            XmlChild::Text(t) => out.push_str(&escape_text(t)),
        }
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_elements_and_attrs() {
        let xml = r#"<MPD type="static"><Period id="p0"><AdaptationSet mimeType="video/mp4"/></Period></MPD>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.tag, "MPD");
        assert_eq!(root.attr("type"), Some("static"));
        let serialized = serialize(&root);
        let reparsed = parse(&serialized).unwrap();
        assert_eq!(reparsed.tag, "MPD");
    }

    #[test]
    fn keeps_xlink_prefixed_attribute_names() {
        let xml = r#"<Period xlink:href="http://example.com/p.xml" xlink:actuate="onLoad"/>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.attr("xlink:href"), Some("http://example.com/p.xml"));
        assert_eq!(root.attr("xlink:actuate"), Some("onLoad"));
    }
}
