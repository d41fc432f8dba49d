//! Convoy Telemetry - logging setup for the Convoy support runtime.
//!
//! Thin configuration layer over the `tracing` ecosystem: pick a level,
//! a format (pretty/compact/json), and a target (stderr/stdout/rolling
//! file), plus per-crate directive overrides.
//!
//! # Example
//!
//! ```rust,no_run
//! use convoy_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), convoy_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("convoy_hub=debug");
//! setup_logging(&config)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
