//! Tracing subscriber setup
//!
//! Builds a layered subscriber:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, falling back to the requested level)
//!   └── Fmt Layer (text or JSON, written to stderr)
//! ```
//!
//! Logs go to stderr so that stdout stays free for per-part progress lines.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level '{0}': must be trace, debug, info, warn or error")]
    InvalidLevel(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Normalize a user-supplied level name
pub fn parse_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" => Ok("warn"),
        "error" => Ok("error"),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_subscriber(level: &str, json: bool) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!(parse_level("DEBUG").unwrap(), "debug");
        assert_eq!(parse_level("warn").unwrap(), "warn");
    }

    #[test]
    fn test_parse_level_rejects_unknown() {
        assert!(matches!(
            parse_level("verbose"),
            Err(LoggingError::InvalidLevel(_))
        ));
    }

    // The only test in this crate that installs the global subscriber
    #[test]
    fn test_init_subscriber() {
        assert!(matches!(
            init_subscriber("loud", false),
            Err(LoggingError::InvalidLevel(ref level)) if level == "loud"
        ));

        init_subscriber("info", false).unwrap();

        assert!(matches!(
            init_subscriber("debug", true),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
