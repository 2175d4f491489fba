//! Tracing setup for test binaries.
//!
//! The library only emits `tracing` events. Test suites that want to see
//! them call [`init_tracing`] and set `SOFTLY_LOG`, e.g.
//! `SOFTLY_LOG=softly_core=debug`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "SOFTLY_LOG";

const DEFAULT_FILTER: &str = "softly_core=warn";

/// Installs a global fmt subscriber writing through the test harness.
///
/// Safe to call from every test: only the first call installs anything.
/// Returns whether this call did.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .is_ok()
}
