//! Error taxonomy for the manifest core.
//!
//! Every failure that can escape a parser or segment-index operation carries a
//! `severity` and `category` in addition to its specific `code`, following the
//! propagation policy described for the manifest core: `Critical` failures
//! abort the enclosing parse or update; `Recoverable` failures are logged and
//! the caller continues (an update timer rearms, a single variant is skipped,
//! and so on).

use thiserror::Error;

/// How a failure should propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the enclosing parse, or the enclosing manifest update.
    Critical,
    /// Logged and reported to the host; the caller may continue.
    Recoverable,
}

/// Which subsystem a failure originates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Manifest,
    Media,
    Network,
    Player,
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid XML: {0}")]
    DashInvalidXml(String),

    #[error("representation has no segment addressing information (no SegmentBase, SegmentList or SegmentTemplate, and none inherited)")]
    DashNoSegmentInfo,

    #[error("unsupported container for SegmentBase indexing: {0}")]
    DashUnsupportedContainer(String),

    #[error("WebM SegmentBase representation is missing a required Initialization element")]
    DashWebmMissingInit,

    #[error("xlink resolution exceeded the maximum depth of {0}")]
    DashXlinkDepthLimit(u32),

    #[error("unsupported xlink:actuate value {0:?} (only \"onLoad\" is supported)")]
    DashUnsupportedXlinkActuate(String),

    #[error("xlink target root element {got:?} did not match host element {expected:?}")]
    DashXlinkElementMismatch { expected: String, got: String },

    #[error("HLS playlist is missing the #EXTM3U header")]
    HlsPlaylistHeaderMissing,

    #[error("a master playlist URL was expected but a media playlist was provided")]
    HlsMasterPlaylistNotProvided,

    #[error("playlist hierarchy is invalid: {0}")]
    HlsInvalidPlaylistHierarchy(String),

    #[error("HLS playlist is missing a required tag: {0}")]
    HlsRequiredTagMissing(String),

    #[error("could not infer codecs for HLS variant")]
    HlsCouldNotGuessCodecs,

    #[error("could not infer MIME type for HLS rendition")]
    HlsCouldNotGuessMimeType,

    #[error("AES-128 encrypted HLS content is not supported")]
    HlsAes128EncryptionNotSupported,

    #[error("could not determine the start time of an HLS segment")]
    HlsCouldNotParseSegmentStartTime,

    /// Recoverable: skip this one variant/stream and continue parsing.
    #[error("skipping stream: {0}")]
    HlsInternalSkipStream(String),

    #[error("sidx box has wrong type, expected 'sidx'")]
    Mp4SidxWrongBoxType,

    #[error("sidx box declares a zero timescale")]
    Mp4SidxInvalidTimescale,

    #[error("hierarchical sidx boxes (reference type 1) are not supported")]
    Mp4SidxTypeNotSupported,

    #[error("attempted to read out of bounds ({pos} + {len} > {total})")]
    BufferReadOutOfBounds { pos: usize, len: usize, total: usize },

    #[error("integer overflow while computing {0}")]
    IntOverflow(String),

    #[error("operation was aborted")]
    OperationAborted,

    #[error("operation timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("bad HTTP status: {0}")]
    BadHttpStatus(u16),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("XML deserialization error: {0}")]
    Xml(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Wraps an otherwise-`Critical` error that occurred during a live
    /// update: per §7's update-time failure policy, these are demoted to
    /// `Recoverable` so the update loop logs and retries instead of
    /// aborting. See [`ManifestError::demote_for_update`].
    #[error("{0} (demoted to recoverable for a live update)")]
    UpdateRecoverable(Box<ManifestError>),
}

impl ManifestError {
    pub fn severity(&self) -> Severity {
        use ManifestError::*;
        match self {
            UpdateRecoverable(_) => Severity::Recoverable,
            HlsInternalSkipStream(_) => Severity::Recoverable,
            BadHttpStatus(_) | HttpError(_) | Timeout => Severity::Recoverable,
            _ => Severity::Critical,
        }
    }

    pub fn category(&self) -> Category {
        use ManifestError::*;
        match self {
            UpdateRecoverable(inner) => inner.category(),
            BufferReadOutOfBounds { .. } | IntOverflow(_) => Category::Player,
            HttpError(_) | BadHttpStatus(_) | Timeout | OperationAborted => Category::Network,
            Mp4SidxWrongBoxType | Mp4SidxInvalidTimescale | Mp4SidxTypeNotSupported => {
                Category::Media
            }
            _ => Category::Manifest,
        }
    }

    /// Demote a failure encountered during a live update into a recoverable
    /// one, per the update-time failure policy (§7): an otherwise-critical
    /// error is wrapped so `severity()` reports `Recoverable` rather than
    /// aborting the caller's update loop. Already-recoverable errors
    /// (`HlsInternalSkipStream`, common network codes) pass through
    /// unchanged.
    pub fn demote_for_update(self) -> Self {
        match self.severity() {
            Severity::Recoverable => self,
            Severity::Critical => ManifestError::UpdateRecoverable(Box::new(self)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// A non-fatal condition surfaced during parsing: an unknown URI-template
/// identifier, a SegmentTimeline gap/overlap, a merge that had to refuse an
/// interleaved insertion, and so on. Collected rather than propagated so that
/// callers can log or assert on them in tests without aborting the parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning(pub String);

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sink that accumulates warnings raised during a single parse or update
/// pass, logging each one as it arrives via `tracing::warn!`.
#[derive(Debug, Default, Clone)]
pub struct Warnings(pub Vec<Warning>);

impl Warnings {
    pub fn push(&mut self, msg: impl Into<String>) {
        let w = Warning(msg.into());
        tracing::warn!("{}", w.0);
        self.0.push(w);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demote_for_update_makes_a_critical_error_recoverable() {
        let err = ManifestError::DashNoSegmentInfo;
        assert_eq!(err.severity(), Severity::Critical);
        let demoted = err.demote_for_update();
        assert_eq!(demoted.severity(), Severity::Recoverable);
    }

    #[test]
    fn demote_for_update_preserves_category() {
        let err = ManifestError::Mp4SidxInvalidTimescale;
        let demoted = err.demote_for_update();
        assert_eq!(demoted.category(), Category::Media);
    }

    #[test]
    fn demote_for_update_is_a_no_op_on_already_recoverable_errors() {
        let err = ManifestError::HlsInternalSkipStream("raw format".to_string());
        let demoted = err.demote_for_update();
        assert_eq!(demoted.severity(), Severity::Recoverable);
        assert!(matches!(demoted, ManifestError::HlsInternalSkipStream(_)));
    }
}
