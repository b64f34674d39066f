//! `$RepresentationID$`/`$Number$`/`$Bandwidth$`/`$Time$` template expansion
//! (C4), per ISO/IEC 23009-1 §5.3.9.4.4.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::Warnings;

/// The value to substitute for one URI-template identifier occurrence. `None`
/// means "this identifier has no value to substitute in this context" (for
/// example, a `$Bandwidth$` template filled before a representation's
/// bandwidth is known).
#[derive(Debug, Clone, Copy)]
pub enum TemplateValue<'a> {
    Str(&'a str),
    Int(u64),
    None,
}

/// The four values a DASH URI template may reference, bundled for a single
/// `fill` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateParams<'a> {
    pub representation_id: Option<&'a str>,
    pub number: Option<u64>,
    pub bandwidth: Option<u64>,
    pub time: Option<f64>,
}

/// Matches a literal `$$` escape or any `$<ident>$`/`$<ident>%0Nc$`-shaped
/// token, known or not. A single combined pattern (rather than a separate
/// `$$`-escaping pre-pass) is what lets adjacent tokens like
/// `$Number$$Bandwidth$` resolve correctly: the engine consumes `$Number$` in
/// full before considering the next `$`, so the boundary between two real
/// tokens is never mistaken for a `$$` escape.
fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\$|\$([A-Za-z][A-Za-z0-9]*)(?:%0(\d+)([diouxX]))?\$").unwrap()
    })
}

fn format_value(value: u64, width: Option<usize>, conv: Option<char>) -> String {
    let base = match conv {
        Some('o') => format!("{value:o}"),
        Some('x') => format!("{value:x}"),
        Some('X') => format!("{value:X}"),
        // 'd' | 'i' | 'u' | none
        _ => format!("{value}"),
    };
    match width {
        Some(w) if base.len() < w => format!("{:0>width$}", base, width = w),
        _ => base,
    }
}

/// Expand every `$Id$`/`$Id%0Nc$` occurrence of a URI template, and collapse
/// `$$` to a literal `$`. Unknown identifiers and missing values are left
/// untouched in the output and raise a warning rather than failing.
pub fn fill(template: &str, params: &TemplateParams, warnings: &mut Warnings) -> String {
    let re = identifier_regex();

    let result = re.replace_all(template, |caps: &regex::Captures| {
        if &caps[0] == "$$" {
            return "$".to_string();
        }
        let ident = &caps[1];
        let width: Option<usize> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let conv: Option<char> = caps.get(3).and_then(|m| m.as_str().chars().next());

        match ident {
            "RepresentationID" => {
                if width.is_some() {
                    warnings.push(
                        "$RepresentationID$ does not support a width specifier; ignoring it",
                    );
                }
                match params.representation_id {
                    Some(v) => v.to_string(),
                    None => {
                        warnings.push("$RepresentationID$ has no value to substitute");
                        caps[0].to_string()
                    }
                }
            }
            "Number" => match params.number {
                Some(v) => format_value(v, width, conv),
                None => {
                    warnings.push("$Number$ has no value to substitute");
                    caps[0].to_string()
                }
            },
            "Bandwidth" => match params.bandwidth {
                Some(v) => format_value(v, width, conv),
                None => {
                    warnings.push("$Bandwidth$ has no value to substitute");
                    caps[0].to_string()
                }
            },
            "Time" => match params.time {
                Some(t) => {
                    let rounded = t.round();
                    if (t - rounded).abs() > 0.2 {
                        warnings.push(format!(
                            "$Time$ value {t} is not within 0.2 of an integer; rounding anyway"
                        ));
                    }
                    format_value(rounded as u64, width, conv)
                }
                None => {
                    warnings.push("$Time$ has no value to substitute");
                    caps[0].to_string()
                }
            },
            other => {
                warnings.push(format!("unknown URI template identifier ${other}$"));
                caps[0].to_string()
            }
        }
    });

    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_width_pads_with_zero() {
        let mut w = Warnings::default();
        let params = TemplateParams {
            number: Some(42),
            ..Default::default()
        };
        assert_eq!(fill("$Number%05d$", &params, &mut w), "00042");
        assert!(w.is_empty());
    }

    #[test]
    fn double_dollar_is_literal() {
        let mut w = Warnings::default();
        assert_eq!(fill("a$$b", &Default::default(), &mut w), "a$b");
    }

    #[test]
    fn adjacent_identifiers_do_not_swallow_each_others_delimiter() {
        let mut w = Warnings::default();
        let params = TemplateParams {
            number: Some(42),
            bandwidth: Some(500),
            ..Default::default()
        };
        assert_eq!(fill("$Number$$Bandwidth$", &params, &mut w), "42500");
        assert!(w.is_empty());
    }

    #[test]
    fn representation_id_ignores_width_and_warns() {
        let mut w = Warnings::default();
        let params = TemplateParams {
            representation_id: Some("v1"),
            ..Default::default()
        };
        assert_eq!(fill("$RepresentationID%04d$", &params, &mut w), "v1");
        assert_eq!(w.0.len(), 1);
    }

    #[test]
    fn unknown_identifier_left_verbatim_with_warning() {
        let mut w = Warnings::default();
        assert_eq!(fill("$Foo$", &Default::default(), &mut w), "$Foo$");
        assert_eq!(w.0.len(), 1);
    }

    #[test]
    fn hex_and_octal_conversions() {
        let mut w = Warnings::default();
        let params = TemplateParams {
            bandwidth: Some(255),
            ..Default::default()
        };
        assert_eq!(fill("$Bandwidth%04x$", &params, &mut w), "00ff");
        let params = TemplateParams {
            bandwidth: Some(255),
            ..Default::default()
        };
        assert_eq!(fill("$Bandwidth%04X$", &params, &mut w), "00FF");
        let params = TemplateParams {
            bandwidth: Some(8),
            ..Default::default()
        };
        assert_eq!(fill("$Bandwidth%03o$", &params, &mut w), "010");
    }

    #[test]
    fn time_rounds_to_nearest_integer() {
        let mut w = Warnings::default();
        let params = TemplateParams {
            time: Some(1999.9),
            ..Default::default()
        };
        assert_eq!(fill("$Time$", &params, &mut w), "2000");
        assert!(w.is_empty());
    }

    #[test]
    fn full_template_roundtrip() {
        let mut w = Warnings::default();
        let params = TemplateParams {
            representation_id: Some("640x480"),
            number: Some(42),
            ..Default::default()
        };
        assert_eq!(
            fill("$RepresentationID$/segment-$Number%05d$.mp4", &params, &mut w),
            "640x480/segment-00042.mp4"
        );
    }
}
