// src/logging.rs
//
// tracing subscriber setup for the harness and tests.
//
// Library code only emits events; binaries decide where they go. Output goes
// to stderr so JSON written to stdout stays clean. RUST_LOG, when set, wins
// over the verbosity flag.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Default filter directive for a `-v` count (0 = warnings only).
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "mdpsim=warn",
        1 => "mdpsim=info",
        2 => "mdpsim=debug",
        _ => "mdpsim=trace",
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let _ = fmt::Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
