//! Configuration types and their defaults.
//!
//! Every default here is the documented runtime default; changing one
//! changes observable behaviour, so treat edits as API changes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use convoy_core::ticket::Priority;
use convoy_telemetry::LogConfig;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvoyConfig {
    /// HTTP/WebSocket server.
    pub server: ServerConfig,
    /// Bearer credential verification.
    pub auth: AuthConfig,
    /// Rate limiting.
    pub rate_limit: RateLimitConfig,
    /// Connection hub.
    pub hub: HubConfig,
    /// AI resolver and circuit breaker.
    pub ai: AiConfig,
    /// Escalation policy.
    pub escalation: EscalationConfig,
    /// Assignment engine.
    pub assignment: AssignmentConfig,
    /// SLA monitor.
    pub sla: SlaScanConfig,
    /// Automation engine.
    pub automation: AutomationConfig,
    /// Metrics ingestion.
    pub metrics: MetricsConfig,
    /// Logging.
    pub log: LogConfig,
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub bind: String,
    /// How long shutdown waits for outbound queues to flush, seconds.
    pub drain_deadline_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
            drain_deadline_secs: 30,
        }
    }
}

/// Bearer credential verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret. Must be set outside of tests.
    pub secret: String,
    /// Role name → permission list expansion.
    pub role_permissions: HashMap<String, Vec<String>>,
    /// Clock-skew leeway applied to time claims, seconds.
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut role_permissions = HashMap::new();
        role_permissions.insert(
            "operator".to_string(),
            vec!["sessions.*".to_string(), "tickets.*".to_string()],
        );
        role_permissions.insert("customer".to_string(), vec!["sessions.write".to_string()]);
        role_permissions.insert("admin".to_string(), vec!["*".to_string()]);
        Self {
            secret: String::new(),
            role_permissions,
            leeway_secs: 30,
        }
    }
}

/// One per-path rate-limit override. Prefix match, first hit wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathOverride {
    /// Path prefix this override applies to.
    pub prefix: String,
    /// Requests per minute.
    pub rpm: u32,
    /// Burst capacity; defaults to one minute's worth of refill.
    #[serde(default)]
    pub burst: Option<u32>,
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Global requests per minute per key.
    pub rpm: u32,
    /// Global burst capacity; defaults to one minute's worth of refill.
    pub burst: Option<u32>,
    /// Header to derive the client key from. `X-Forwarded-For` takes the
    /// left-most address.
    pub key_header: Option<String>,
    /// Keys that bypass limiting entirely.
    pub whitelist: BTreeSet<String>,
    /// Per-path overrides, checked in order.
    pub overrides: Vec<PathOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rpm: 60,
            burst: None,
            key_header: None,
            whitelist: BTreeSet::new(),
            overrides: Vec::new(),
        }
    }
}

/// Connection hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-client outbound queue capacity, frames.
    pub outbound_queue: usize,
    /// Heartbeat interval, seconds. A client with no activity for three
    /// intervals is considered dead.
    pub heartbeat_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            heartbeat_secs: 25,
        }
    }
}

/// Circuit breaker settings for the primary AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Sliding failure window, seconds.
    pub window_secs: u64,
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before a trial call, seconds.
    pub retry_after_secs: u64,
    /// Cap on the doubled retry-after, seconds.
    pub max_retry_after_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            failure_threshold: 5,
            retry_after_secs: 30,
            max_retry_after_secs: 240,
        }
    }
}

/// AI resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Primary backend base URL; empty disables the primary entirely.
    pub base_url: String,
    /// API key for the primary backend.
    pub api_key: String,
    /// Model name passed to the backend.
    pub model: String,
    /// Per-call deadline, seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Answers below this confidence escalate to a human.
    pub confidence_threshold: f64,
    /// How many fallback documents feed a synthesized answer.
    pub fallback_top_k: usize,
    /// Circuit breaker.
    pub breaker: BreakerConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            temperature: 0.7,
            confidence_threshold: 0.5,
            fallback_top_k: 3,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Escalation policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Phrases that force escalation, matched case-insensitively against
    /// the last `phrase_window` customer messages.
    pub phrases: Vec<String>,
    /// Phrases that mark a conversation as wrapping up.
    pub terminators: Vec<String>,
    /// How many recent customer messages the phrase rule inspects.
    pub phrase_window: usize,
    /// How many recent messages feed the AI resolver as history.
    pub history_window: usize,
    /// AI answers without resolution before the persistence rule fires.
    pub max_ai_answers: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            phrases: vec![
                "agent".to_string(),
                "human".to_string(),
                "manager".to_string(),
                "real person".to_string(),
            ],
            terminators: vec![
                "thanks".to_string(),
                "thank you".to_string(),
                "bye".to_string(),
                "goodbye".to_string(),
            ],
            phrase_window: 3,
            history_window: 10,
            max_ai_answers: 5,
        }
    }
}

/// Assignment engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Periodic queue drain tick, seconds.
    pub drain_tick_secs: u64,
    /// Minimum priority that may land on an `away` operator.
    pub away_eligible_floor: Priority,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            drain_tick_secs: 5,
            away_eligible_floor: Priority::High,
        }
    }
}

/// Business-hours window used by SLA deadline math (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessHours {
    /// First counted hour of the day (inclusive).
    pub start_hour: u32,
    /// Last counted hour of the day (exclusive).
    pub end_hour: u32,
    /// Counted weekdays, 0 = Monday.
    pub weekdays: BTreeSet<u8>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 17,
            weekdays: (0..5).collect(),
        }
    }
}

/// SLA monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaScanConfig {
    /// Scan interval, seconds.
    pub scan_interval_secs: u64,
    /// Global business-hours calendar.
    pub business_hours: BusinessHours,
}

impl Default for SlaScanConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            business_hours: BusinessHours::default(),
        }
    }
}

/// Automation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Webhook delivery attempts.
    pub webhook_retries: u32,
    /// Base webhook backoff, milliseconds (doubles per attempt).
    pub webhook_backoff_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            webhook_retries: 3,
            webhook_backoff_ms: 200,
        }
    }
}

/// Metrics ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Client metric names accepted by the ingestion endpoint; anything
    /// else is silently dropped.
    pub ingest_whitelist: BTreeSet<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            ingest_whitelist: ["widget_loads", "widget_errors", "rtc_setup_ms"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ConvoyConfig::default();
        assert_eq!(config.rate_limit.rpm, 60);
        assert_eq!(config.hub.outbound_queue, 256);
        assert_eq!(config.hub.heartbeat_secs, 25);
        assert_eq!(config.ai.timeout_secs, 30);
        assert!((config.ai.confidence_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.ai.breaker.failure_threshold, 5);
        assert_eq!(config.ai.breaker.window_secs, 30);
        assert_eq!(config.ai.breaker.retry_after_secs, 30);
        assert_eq!(config.escalation.phrase_window, 3);
        assert_eq!(config.escalation.history_window, 10);
        assert_eq!(config.escalation.max_ai_answers, 5);
        assert_eq!(config.assignment.drain_tick_secs, 5);
        assert_eq!(config.sla.scan_interval_secs, 300);
        assert_eq!(config.automation.webhook_retries, 3);
        assert_eq!(config.server.drain_deadline_secs, 30);
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: ConvoyConfig = toml::from_str("").unwrap();
        assert_eq!(config.rate_limit.rpm, 60);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: ConvoyConfig = toml::from_str(
            r#"
            [rate_limit]
            rpm = 120

            [[rate_limit.overrides]]
            prefix = "/api/metrics"
            rpm = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.rpm, 120);
        assert_eq!(config.rate_limit.overrides.len(), 1);
        assert_eq!(config.rate_limit.overrides[0].prefix, "/api/metrics");
        // Untouched sections keep defaults.
        assert_eq!(config.hub.outbound_queue, 256);
    }
}
