//! Line-level M3U8 tag tokenizer: `#EXT-<name>[:<value>]` with either a bare
//! value or a comma-separated attribute list, quoted strings protecting
//! embedded commas. No AST per tag; `playlist.rs` pulls named tags and reads
//! typed attributes on demand, the same "plain struct, `Option<String>`
//! field, parse-on-demand" register `dash::xml`'s deserialized structs use.

use std::collections::BTreeMap;

/// One `#EXT...` tag, with its name (without the leading `#`) and its raw,
/// un-split value (everything after the first `:`, if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: Option<String>,
}

impl Tag {
    pub fn attributes(&self) -> AttributeList {
        AttributeList::parse(self.value.as_deref().unwrap_or(""))
    }
}

/// One tokenized line of a playlist: either a tag or a URI (any non-empty,
/// non-`#` line). Blank lines and non-EXT comments (`# ...`) are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Tag(Tag),
    Uri(String),
}

/// Tokenize an entire playlist into an ordered sequence of tags and URIs.
pub fn tokenize(text: &str) -> Vec<Entry> {
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT") {
            let name_full = format!("EXT{rest}");
            let (name, value) = match name_full.split_once(':') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (name_full, None),
            };
            out.push(Entry::Tag(Tag { name, value }));
        } else if line.starts_with('#') {
            continue;
        } else {
            out.push(Entry::Uri(line.to_string()));
        }
    }
    out
}

/// Split `s` on commas that are not inside a double-quoted span, so that a
/// `CODECS="avc1.4d401f,mp4a.40.2"` attribute value doesn't get sliced in
/// half.
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// A parsed `KEY=VALUE,KEY2="quoted, value"` attribute list, as carried by
/// `EXT-X-STREAM-INF`, `EXT-X-MEDIA`, `EXT-X-MAP`, `EXT-X-KEY` and
/// `EXT-X-DATERANGE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList(BTreeMap<String, String>);

impl AttributeList {
    pub fn parse(raw: &str) -> Self {
        let mut map = BTreeMap::new();
        for part in split_top_level_commas(raw) {
            if let Some((k, v)) = part.split_once('=') {
                let key = k.trim().to_ascii_uppercase();
                let value = v.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                map.insert(key, value.to_string());
            }
        }
        AttributeList(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// HLS booleans are the bare strings `YES`/`NO`; absent means `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key) == Some("YES")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_tags_and_uris() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:5.994,\nseg-1.ts\n\n# a plain comment\nseg-2.ts\n";
        let entries = tokenize(text);
        assert_eq!(
            entries,
            vec![
                Entry::Tag(Tag { name: "EXTM3U".into(), value: None }),
                Entry::Tag(Tag { name: "EXT-X-TARGETDURATION".into(), value: Some("6".into()) }),
                Entry::Tag(Tag { name: "EXTINF".into(), value: Some("5.994,".into()) }),
                Entry::Uri("seg-1.ts".into()),
                Entry::Uri("seg-2.ts".into()),
            ]
        );
    }

    #[test]
    fn attribute_list_respects_quoted_commas() {
        let attrs = AttributeList::parse(r#"BANDWIDTH=1280000,CODECS="avc1.4d401f,mp4a.40.2",AUDIO="aac""#);
        assert_eq!(attrs.get_u64("BANDWIDTH"), Some(1_280_000));
        assert_eq!(attrs.get("CODECS"), Some("avc1.4d401f,mp4a.40.2"));
        assert_eq!(attrs.get("AUDIO"), Some("aac"));
    }

    #[test]
    fn boolean_attribute_defaults_to_false() {
        let attrs = AttributeList::parse("TYPE=AUDIO,DEFAULT=YES");
        assert!(attrs.get_bool("DEFAULT"));
        assert!(!attrs.get_bool("AUTOSELECT"));
    }
}
