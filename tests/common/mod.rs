//! Shared code for the integration test suite.

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

pub fn setup_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_test_writer().try_init().ok();
    });
}
