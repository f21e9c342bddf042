//! One-shot `tracing` init for tests, so integration tests across crates can
//! opt into log output (`cargo test -- --nocapture`) without each one
//! installing its own subscriber and panicking on the second call.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a compact, test-friendly `tracing` subscriber exactly once per
/// process, regardless of how many tests call this.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .try_init();
    });
}
