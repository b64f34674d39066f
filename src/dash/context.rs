//! Attribute/child inheritance across the Period → AdaptationSet →
//! Representation frame stack (C5).

use crate::dash::xml::{AdaptationSet, Period, Representation, SegmentBase, SegmentList, SegmentTemplate};

/// A borrowed view of the three frames a Representation's effective segment
/// addressing can be inherited from, innermost first.
pub struct InheritanceFrame<'a> {
    pub representation: &'a Representation,
    pub adaptation_set: &'a AdaptationSet,
    pub period: &'a Period,
}

impl<'a> InheritanceFrame<'a> {
    pub fn new(
        representation: &'a Representation,
        adaptation_set: &'a AdaptationSet,
        period: &'a Period,
    ) -> Self {
        InheritanceFrame {
            representation,
            adaptation_set,
            period,
        }
    }

    /// Walk Representation → AdaptationSet → Period, returning the first
    /// frame for which `select` returns `Some`. The typed helpers below
    /// (`segment_template`, `segment_base`, ...) are this generic specialized
    /// to the three inheritable child elements.
    pub fn inherit<T: 'a>(
        &self,
        select: impl Fn(Option<&'a SegmentTemplate>, Option<&'a SegmentBase>, Option<&'a SegmentList>) -> Option<&'a T>,
    ) -> Option<&'a T> {
        select(
            self.representation.SegmentTemplate.as_ref(),
            self.representation.SegmentBase.as_ref(),
            self.representation.SegmentList.as_ref(),
        )
        .or_else(|| {
            select(
                self.adaptation_set.SegmentTemplate.as_ref(),
                self.adaptation_set.SegmentBase.as_ref(),
                self.adaptation_set.SegmentList.as_ref(),
            )
        })
        .or_else(|| select(self.period.SegmentTemplate.as_ref(), None, None))
    }

    pub fn segment_template(&self) -> Option<&'a SegmentTemplate> {
        self.representation
            .SegmentTemplate
            .as_ref()
            .or(self.adaptation_set.SegmentTemplate.as_ref())
            .or(self.period.SegmentTemplate.as_ref())
    }

    pub fn segment_base(&self) -> Option<&'a SegmentBase> {
        self.representation
            .SegmentBase
            .as_ref()
            .or(self.adaptation_set.SegmentBase.as_ref())
    }

    pub fn segment_list(&self) -> Option<&'a SegmentList> {
        self.representation
            .SegmentList
            .as_ref()
            .or(self.adaptation_set.SegmentList.as_ref())
    }

    pub fn mime_type(&self) -> Option<&'a str> {
        self.representation
            .mimeType
            .as_deref()
            .or(self.adaptation_set.mimeType.as_deref())
    }

    pub fn codecs(&self) -> Option<&'a str> {
        self.representation
            .codecs
            .as_deref()
            .or(self.adaptation_set.codecs.as_deref())
    }

    pub fn base_url(&self) -> Option<&'a str> {
        self.representation
            .BaseURL
            .as_ref()
            .map(|b| b.base.as_str())
            .or(self.adaptation_set.BaseURL.as_ref().map(|b| b.base.as_str()))
            .or(self.period.BaseURL.as_ref().map(|b| b.base.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dash::xml::{AdaptationSet, Period, Representation};

    fn empty_period() -> Period {
        quick_xml::de::from_str(r#"<Period id="p0"/>"#).unwrap()
    }

    fn adaptation_set_with_template() -> AdaptationSet {
        quick_xml::de::from_str(
            r#"<AdaptationSet mimeType="video/mp4"><SegmentTemplate media="s$Number$.m4s" duration="5000" timescale="1000"/></AdaptationSet>"#,
        )
        .unwrap()
    }

    #[test]
    fn representation_level_template_wins_over_adaptation_set() {
        let period = empty_period();
        let aset = adaptation_set_with_template();
        let rep: Representation = quick_xml::de::from_str(
            r#"<Representation id="v0"><SegmentTemplate media="r$Number$.m4s" duration="2000" timescale="1000"/></Representation>"#,
        )
        .unwrap();
        let frame = InheritanceFrame::new(&rep, &aset, &period);
        assert_eq!(
            frame.segment_template().unwrap().media.as_deref(),
            Some("r$Number$.m4s")
        );
    }

    #[test]
    fn falls_back_to_adaptation_set_template() {
        let period = empty_period();
        let aset = adaptation_set_with_template();
        let rep: Representation = quick_xml::de::from_str(r#"<Representation id="v0"/>"#).unwrap();
        let frame = InheritanceFrame::new(&rep, &aset, &period);
        assert_eq!(
            frame.segment_template().unwrap().media.as_deref(),
            Some("s$Number$.m4s")
        );
        assert_eq!(frame.mime_type(), Some("video/mp4"));
    }
}
