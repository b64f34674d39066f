//! Host filter hooks (Design Notes §9): an explicit value passed to a parser
//! factory rather than process-wide mutable registration state.

use crate::model::manifest::{ContentProtection, Period};

/// Host-supplied capability filters. A parser calls these once per parse
/// (and once per period on a live update) so the host can drop variants it
/// cannot play (unsupported codec, unsupported DRM scheme) without the core
/// knowing anything about codec support or key systems itself.
pub trait Registry: Send + Sync {
    /// Called once with every period after a full parse, before the
    /// `Manifest` is returned. The default keeps everything.
    fn filter_all_periods(&self, periods: &mut Vec<Period>) {
        let _ = periods;
    }

    /// Called for a single newly discovered period (e.g. one that appeared
    /// in a live MPD update). The default keeps the period unmodified.
    fn filter_new_period(&self, period: &mut Period) {
        let _ = period;
    }

    /// Whether a DRM-protected representation should be kept. The default
    /// accepts everything; a host with no decryption capability would
    /// override this to reject anything with a non-empty protection list.
    fn accepts_content_protection(&self, protection: &[ContentProtection]) -> bool {
        let _ = protection;
        true
    }
}

/// A `Registry` that keeps everything; the default when a host has no
/// filtering needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveRegistry;

impl Registry for PermissiveRegistry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_registry_accepts_everything() {
        let r = PermissiveRegistry;
        assert!(r.accepts_content_protection(&[ContentProtection::default()]));
    }
}
