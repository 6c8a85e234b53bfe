//! Console logging setup for the binary.
//!
//! `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--verbose`.

use tracing_subscriber::EnvFilter;

/// Pick the filter directive: `RUST_LOG`, else the verbosity default.
pub fn filter_directive(env: Option<&str>, verbose: bool) -> String {
    match env {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ if verbose => "debug".to_string(),
        _ => "info".to_string(),
    }
}

/// Install the global subscriber. Logs go to stderr so the summary on
/// stdout stays clean.
pub fn init(verbose: bool) {
    let env = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(filter_directive(env.as_deref(), verbose))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
