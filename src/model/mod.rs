//! Presentation data model (C1–C3): segment references, the segment index,
//! the presentation clock, and the period/variant/stream/manifest tree they
//! compose into.

pub mod manifest;
pub mod segment_index;
pub mod segment_reference;
pub mod timeline;

pub use manifest::{
    Accessibility, ContentProtection, Label, Manifest, ManifestUpdate, Period, Role, Stream,
    StreamKind, TimelineRegion, Variant, Viewpoint,
};
pub use segment_index::SegmentIndex;
pub use segment_reference::{InitSegmentReference, SegmentReference, TimeRange};
pub use timeline::PresentationTimeline;
