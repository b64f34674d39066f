//! DASH MPD parsing: inheritance resolution, URI templates, segment-info
//! builders, binary probes, xlink dereferencing, and the top-level
//! [`parser::DashParser`] driver (C5–C10).

pub mod context;
pub mod parser;
pub mod probes;
pub mod segment_builders;
pub mod segment_timeline;
pub mod xlink;
pub mod xml;
pub mod xmltree;
