pub mod bench;
pub mod fixtures;
pub mod recording;
pub mod substrate;

pub use bench::{BenchRouter, TestBench};
pub use recording::{RecordingAudit, RecordingNotifier};
pub use substrate::{FlakyKv, TempSqlite};

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process. The filter comes from
/// `PLANVAULT_LOG` and defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_env("PLANVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
