//! Telemetry error types.

use thiserror::Error;

/// Errors raised while configuring logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configuration was invalid (bad filter directive, unwritable
    /// log directory).
    #[error("telemetry config error: {0}")]
    ConfigError(String),

    /// The global subscriber could not be installed (usually: installed
    /// twice).
    #[error("telemetry init error: {0}")]
    InitError(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
