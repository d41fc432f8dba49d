//! Configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::ConvoyConfig;

/// Validate a configuration, collecting every problem before failing so
/// the operator sees the full list at once.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] listing each violated constraint.
pub fn validate(config: &ConvoyConfig) -> ConfigResult<()> {
    let mut problems = Vec::new();

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        problems.push(format!("server.bind is not a socket address: {}", config.server.bind));
    }
    if config.server.drain_deadline_secs == 0 {
        problems.push("server.drain_deadline_secs must be non-zero".to_string());
    }

    if config.rate_limit.rpm == 0 {
        problems.push("rate_limit.rpm must be non-zero".to_string());
    }
    if config.rate_limit.burst == Some(0) {
        problems.push("rate_limit.burst must be non-zero when set".to_string());
    }
    for (i, o) in config.rate_limit.overrides.iter().enumerate() {
        if o.prefix.is_empty() {
            problems.push(format!("rate_limit.overrides[{i}].prefix is empty"));
        }
        if o.rpm == 0 {
            problems.push(format!("rate_limit.overrides[{i}].rpm must be non-zero"));
        }
    }

    if config.hub.outbound_queue == 0 {
        problems.push("hub.outbound_queue must be non-zero".to_string());
    }
    if config.hub.heartbeat_secs == 0 {
        problems.push("hub.heartbeat_secs must be non-zero".to_string());
    }

    if !(0.0..=1.0).contains(&config.ai.confidence_threshold) {
        problems.push("ai.confidence_threshold must be in [0, 1]".to_string());
    }
    if config.ai.timeout_secs == 0 {
        problems.push("ai.timeout_secs must be non-zero".to_string());
    }
    if config.ai.breaker.failure_threshold == 0 {
        problems.push("ai.breaker.failure_threshold must be non-zero".to_string());
    }
    if config.ai.breaker.window_secs == 0 {
        problems.push("ai.breaker.window_secs must be non-zero".to_string());
    }
    if config.ai.breaker.retry_after_secs == 0 {
        problems.push("ai.breaker.retry_after_secs must be non-zero".to_string());
    }
    if config.ai.breaker.max_retry_after_secs < config.ai.breaker.retry_after_secs {
        problems.push(
            "ai.breaker.max_retry_after_secs must be >= retry_after_secs".to_string(),
        );
    }

    if config.escalation.history_window == 0 {
        problems.push("escalation.history_window must be non-zero".to_string());
    }

    if config.assignment.drain_tick_secs == 0 {
        problems.push("assignment.drain_tick_secs must be non-zero".to_string());
    }

    if config.sla.scan_interval_secs == 0 {
        problems.push("sla.scan_interval_secs must be non-zero".to_string());
    }
    let hours = &config.sla.business_hours;
    if hours.start_hour >= hours.end_hour || hours.end_hour > 24 {
        problems.push(format!(
            "sla.business_hours window is invalid: {}..{}",
            hours.start_hour, hours.end_hour
        ));
    }
    if hours.weekdays.iter().any(|d| *d > 6) {
        problems.push("sla.business_hours.weekdays entries must be 0..=6".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConvoyConfig;

    #[test]
    fn default_config_is_valid() {
        validate(&ConvoyConfig::default()).unwrap();
    }

    #[test]
    fn problems_are_collected_not_short_circuited() {
        let mut config = ConvoyConfig::default();
        config.rate_limit.rpm = 0;
        config.hub.heartbeat_secs = 0;

        let err = validate(&config).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("rate_limit.rpm"));
        assert!(text.contains("hub.heartbeat_secs"));
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        let mut config = ConvoyConfig::default();
        config.server.bind = "not-an-addr".to_string();
        assert!(validate(&config).is_err());
    }
}
