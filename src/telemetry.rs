//! Tracing setup for the CLI.
//!
//! `FLEETDECK_LOG` takes an `EnvFilter` directive (default `warn`).
//! `FLEETDECK_LOG_FORMAT=json` switches to one JSON object per event.
//! Output always goes to stderr so `--format json` stays parseable.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FLEETDECK_LOG";
pub const LOG_FORMAT_ENV: &str = "FLEETDECK_LOG_FORMAT";

/// Install the global subscriber. A second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    // Err only when a subscriber is already set.
    let _ = if json { builder.json().try_init() } else { builder.compact().try_init() };
}
