//! Logging setup for applications built on the ISY SDK
//!
//! Both crates log through `tracing`; nothing is printed until a subscriber
//! is installed. Call one of these early, before starting the event stream.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output
    Development,
    /// Verbose diagnostics with thread ids and source locations
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}

/// Initialize logging with the specified mode
///
/// # Examples
///
/// ```rust,ignore
/// isy_state::logging::init_logging(LoggingMode::Development)?;
/// ```
///
/// # Environment Variables
///
/// - `ISY_LOG_LEVEL`: filter directive, e.g. `debug` or `isy_stream=trace`
/// - `RUST_LOG`: used when `ISY_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_thread_names(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `ISY_LOG_MODE` (`silent`, `development`, `debug`).
///
/// Defaults to silent when unset or unrecognized.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var("ISY_LOG_MODE")
        .ok()
        .and_then(|mode| parse_mode(&mode))
        .unwrap_or(LoggingMode::Silent);

    init_logging(mode)
}

fn parse_mode(mode: &str) -> Option<LoggingMode> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "silent" => Some(LoggingMode::Silent),
        "development" | "dev" => Some(LoggingMode::Development),
        "debug" => Some(LoggingMode::Debug),
        _ => None,
    }
}

/// Build a filter from `ISY_LOG_LEVEL`, then `RUST_LOG`, then `default_level`.
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var("ISY_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidFilter(format!("{}: {}", directives, e)))
}

/// Whether a global subscriber is already installed.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
