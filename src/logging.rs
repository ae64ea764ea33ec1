//! Logging initialization: tracing events go to stderr.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, AppResult};

const DEFAULT_LEVEL: &str = "warn";

/// Install the global subscriber.
///
/// `level` comes from `--log` and accepts the usual names in any case
/// (`CRITICAL` is treated as `error`). `RUST_LOG` takes precedence.
pub fn init(level: Option<&str>) -> AppResult<()> {
    let level = match level {
        Some(level) => parse_level(level)?,
        None => DEFAULT_LEVEL,
    };
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives)
            .map_err(|err| AppError::Configuration(format!("invalid RUST_LOG: {err}")))?,
        _ => EnvFilter::new(level),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| AppError::Configuration(format!("logging already initialized: {err}")))
}

fn parse_level(level: &str) -> AppResult<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" => Ok("error"),
        _ => Err(AppError::Configuration(format!(
            "unknown log level {level:?}; use one of DEBUG, INFO, WARNING, ERROR, CRITICAL"
        ))),
    }
}
