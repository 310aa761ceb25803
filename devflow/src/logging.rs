//! Diagnostic tracing for the CLI.
//!
//! - **Tracing (this module)**: operator diagnostics via `RUST_LOG` or `-v`,
//!   written to stderr. Not persisted.
//! - **Log sink (`io/log_sink`)**: product records such as agent answers and
//!   cycle records. Unaffected by verbosity.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbosity` picks the level.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=devflow::agents=debug devflow run --request request.txt
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[cfg(test)]
mod tests {
    use super::default_directive;

    #[test]
    fn verbosity_raises_the_default_level() {
        assert_eq!(default_directive(0), "warn");
        assert_eq!(default_directive(1), "info");
        assert_eq!(default_directive(2), "debug");
        assert_eq!(default_directive(7), "debug");
    }
}
