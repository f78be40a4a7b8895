//! Tracing setup
//!
//! Logs go to stderr; stdout is reserved for host output.

use tracing_subscriber::EnvFilter;

/// Filter directive for the configured level and `-v` count
#[must_use]
pub fn directive(level: &str, verbose: u8) -> String {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    // russh is chatty below warn
    if verbose > 1 {
        level.to_string()
    } else {
        format!("{level},russh=warn")
    }
}

/// Install the global subscriber; `RUST_LOG` wins over the computed directive
pub fn init(level: &str, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(level, verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
