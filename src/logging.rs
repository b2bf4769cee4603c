//! Process-wide log output.

use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Map a configured level name to a `tracing` level. `warning` is accepted for `warn`.
pub fn parse_level(level: &str) -> Result<Level, String> {
    match level.to_ascii_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "invalid log level: {} (valid: debug, info, warn, error)",
            level
        )),
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once leaves the first subscriber in place.
pub fn init(config: &LoggingConfig) {
    let (level, level_error) = match parse_level(&config.level) {
        Ok(level) => (level, None),
        Err(e) => (Level::INFO, Some(e)),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match config.format.to_ascii_lowercase().as_str() {
        "json" => builder.json().with_current_span(false).try_init(),
        "text" => builder.compact().with_ansi(false).try_init(),
        _ => builder.pretty().with_target(false).try_init(),
    };

    if let Some(e) = level_error {
        error!(error = %e, "Invalid log level, using INFO");
    }
}
