//! `tracing` subscriber bootstrap.
//!
//! Log context (command id, attempt, close code) travels as structured span
//! and event fields. Output goes to stderr so stdout stays free for tooling.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. `json` switches from
/// compact human-readable lines to one JSON object per event. Subsequent
/// calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = build_filter(level);

    if json {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json();
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact();
        let _ = subscriber.try_init();
    }
}

/// Build the env filter, falling back to `level` and then to `info`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
