pub mod fixtures;
pub mod flaky;
pub mod session;

pub use flaky::FlakyStore;
pub use session::TestSession;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a test-writer subscriber once per test binary. Honors `RUST_LOG`,
/// defaults to `warn`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .compact()
        .try_init();
}
