//! Convoy Config - typed configuration for the Convoy support runtime.
//!
//! One `ConvoyConfig` struct covers every tunable the runtime exposes:
//! server binding and drain deadline, auth secrets and role mappings,
//! rate-limit buckets, hub queue/heartbeat sizing, AI backend and
//! circuit-breaker knobs, escalation policy, assignment, SLA scanning,
//! automation webhooks, metrics ingestion, and logging.
//!
//! Configuration loads from a TOML file, then a small set of
//! `CONVOY_*` environment variables override the file, then the result
//! is validated. Defaults match the runtime's documented defaults, so
//! an empty file (or no file) yields a working dev configuration.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod loader;
mod types;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load, load_or_default};
pub use types::{
    AiConfig, AssignmentConfig, AuthConfig, AutomationConfig, BreakerConfig, BusinessHours,
    ConvoyConfig, EscalationConfig, HubConfig, MetricsConfig, PathOverride, RateLimitConfig,
    ServerConfig, SlaScanConfig,
};
pub use validate::validate;
