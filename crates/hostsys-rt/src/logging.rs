//! Log setup for hosts and the CLI.
//!
//! The library itself only emits `tracing` events. `init` installs a fmt
//! subscriber writing to stderr, filtered by `HOSTSYS_LOG` (same syntax as
//! `RUST_LOG`, default `info`). Calling it more than once is harmless, and it
//! leaves an already-installed global subscriber in place.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "HOSTSYS_LOG";

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}
