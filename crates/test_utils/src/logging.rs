//! Tracing setup for tests

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

/// Installs a test-writer subscriber once per process
///
/// Verbosity follows `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    init_tracing_at("warn");
}

/// Like `init_tracing`, falling back to `level` when `RUST_LOG` is unset
///
/// Only the first call in a process has any effect.
pub fn init_tracing_at(level: &str) {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another harness may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
