//! Test log output.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a fmt subscriber writing through the test harness.
///
/// Filtered by `RUST_LOG`, defaulting to `allot_bind=debug`. Safe to call
/// from every test; only the first call has an effect.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("allot_bind=debug"));
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
