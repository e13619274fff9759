//! Logging initialization.
//!
//! All pipeline components log through `tracing`; embedders call
//! [`init_logging`] once at startup, or install their own subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system.
///
/// Sets up a `tracing` subscriber with:
/// - Log level from `RUST_LOG` or the provided default
/// - Compact single-line output to stderr
///
/// Calling this twice is harmless; the second call is ignored.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Pipeline started");
/// ```
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Parse a log level string into a tracing Level.
#[allow(dead_code)]
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_handles_aliases_and_fallback() {
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("WARNING"), tracing::Level::WARN);
        assert_eq!(parse_level("bogus"), tracing::Level::INFO);
    }

    #[test]
    fn init_logging_is_reentrant() {
        init_logging("debug");
        init_logging("info");
    }
}
