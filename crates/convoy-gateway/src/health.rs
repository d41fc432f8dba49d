//! Health checks aggregated across the runtime's components.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Overall health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// All systems healthy.
    Healthy,
    /// Non-critical issues (breaker open, deep queue).
    Degraded,
    /// Critical issues.
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of a single component check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name.
    pub component: &'static str,
    /// State.
    pub state: HealthState,
    /// Optional detail.
    pub message: Option<String>,
    /// Check duration.
    pub duration_ms: u64,
}

impl HealthCheck {
    /// A healthy check.
    #[must_use]
    pub fn healthy(component: &'static str, duration: Duration) -> Self {
        Self {
            component,
            state: HealthState::Healthy,
            message: None,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// A degraded check with a reason.
    #[must_use]
    pub fn degraded(
        component: &'static str,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            component,
            state: HealthState::Degraded,
            message: Some(message.into()),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// An unhealthy check with a reason.
    #[must_use]
    pub fn unhealthy(
        component: &'static str,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            component,
            state: HealthState::Unhealthy,
            message: Some(message.into()),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Aggregated health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Worst state across checks.
    pub state: HealthState,
    /// When computed.
    pub checked_at: DateTime<Utc>,
    /// Individual checks.
    pub checks: Vec<HealthCheck>,
    /// Daemon uptime.
    pub uptime_secs: u64,
    /// Build version.
    pub version: &'static str,
}

impl HealthStatus {
    /// Aggregate individual checks.
    #[must_use]
    pub fn from_checks(checks: Vec<HealthCheck>, uptime: Duration) -> Self {
        let state = if checks.iter().any(|c| c.state == HealthState::Unhealthy) {
            HealthState::Unhealthy
        } else if checks.iter().any(|c| c.state == HealthState::Degraded) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        Self {
            state,
            checked_at: Utc::now(),
            checks,
            uptime_secs: uptime.as_secs(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Whether everything is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }
}
