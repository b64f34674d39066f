//! A Rust library for parsing adaptive-streaming manifests — MPEG-DASH MPDs
//! and HLS M3U8 playlists — into a single shared presentation model.
//!
//! Both formats describe the same thing in different vocabularies: a
//! presentation timeline, one or more periods, and for each period a set of
//! alternative streams (renditions/representations), each with an ordered
//! index of fetchable media segments. This crate normalizes both into the
//! [`model`] tree so that a player only needs to understand one data model
//! regardless of which manifest format a given title uses.
//!
//! ## Parsing a manifest
//!
//! [`dash::parser::DashParser`] and [`hls::parser::HlsParser`] are the two
//! entry points; both are constructed from a [`fetch::Fetcher`] (the
//! collaborator that performs HTTP requests) and a [`registry::Registry`]
//! (the collaborator that lets a host filter periods and content protection
//! schemes). A ready-made `Fetcher` backed by `reqwest` is available behind
//! the `fetch-reqwest` feature (enabled by default) as
//! [`fetch::reqwest_fetcher::ReqwestFetcher`].
//!
//! ```no_run
//! # async fn run() -> manifest_core::error::Result<()> {
//! use std::sync::Arc;
//! use manifest_core::dash::parser::DashParser;
//! use manifest_core::fetch::reqwest_fetcher::ReqwestFetcher;
//! use manifest_core::registry::PermissiveRegistry;
//!
//! let fetcher = Arc::new(ReqwestFetcher::new(reqwest::Client::new()));
//! let parser = DashParser::new(fetcher, Arc::new(PermissiveRegistry));
//! let manifest = parser.parse("https://example.com/stream.mpd").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Live presentations
//!
//! Both parsers expose `update_once`/`run_live_updates` to refresh a dynamic
//! MPD or a live (non-`EXT-X-ENDLIST`) M3U8 on a loop, merging newly
//! discovered segments into the existing [`model::SegmentIndex`]es rather
//! than rebuilding the manifest from scratch.
//!
//! ## Non-goals
//!
//! This crate parses manifests and maintains the segment-level model of a
//! presentation; it does not fetch or decode media segments, does not
//! perform adaptive bitrate selection, and does not decrypt DRM-protected
//! content.

pub mod dash;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod manifest_utils;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod uri_template;

pub use dash::parser::DashParser;
pub use error::{ManifestError, Result};
pub use hls::parser::HlsParser;
pub use model::Manifest;
