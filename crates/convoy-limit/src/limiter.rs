//! The limiter: scopes, key derivation, and the admit/reject decision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use prometheus::{IntCounterVec, Opts, Registry};
use serde::Serialize;
use tracing::debug;

use convoy_config::RateLimitConfig;

use crate::bucket::TokenBucket;

/// The limiter's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request admitted.
    Admit,
    /// Request rejected; retry after this many seconds.
    Reject {
        /// Seconds until a token will be available.
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Whether the request was admitted.
    #[must_use]
    pub fn is_admit(self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// The JSON body of a rate-limit rejection.
#[derive(Debug, Clone, Serialize)]
pub struct RejectBody {
    /// Always "Too Many Requests".
    pub error: &'static str,
    /// Human-readable explanation.
    pub message: String,
    /// Seconds until the client should retry.
    pub retry_after: u64,
}

impl RejectBody {
    /// Build the standard rejection body.
    #[must_use]
    pub fn new(retry_after: u64) -> Self {
        Self {
            error: "Too Many Requests",
            message: format!("rate limit exceeded, retry in {retry_after}s"),
            retry_after,
        }
    }
}

/// One bucket map with its own rate and burst.
///
/// The outer map is read-mostly (`RwLock`); each bucket has its own
/// mutex so concurrent keys never contend.
struct Scope {
    label: String,
    rate_per_sec: f64,
    burst: f64,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl Scope {
    fn new(label: impl Into<String>, rpm: u32, burst: Option<u32>) -> Self {
        // Default burst: one minute's worth of refill.
        let burst = f64::from(burst.unwrap_or(rpm).max(1));
        Self {
            label: label.into(),
            rate_per_sec: f64::from(rpm) / 60.0,
            burst,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket_for(&self, key: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(bucket);
        }
        let mut map = self
            .buckets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::full(self.burst, now)))),
        )
    }

    fn check(&self, key: &str, now: Instant) -> Decision {
        let bucket = self.bucket_for(key, now);
        let mut bucket = bucket
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match bucket.try_take(self.rate_per_sec, self.burst, now) {
            Ok(()) => Decision::Admit,
            Err(retry_after_secs) => Decision::Reject { retry_after_secs },
        }
    }
}

/// Per-key token-bucket limiter with per-path overrides and a
/// whitelist.
pub struct RateLimiter {
    key_header: Option<String>,
    whitelist: std::collections::BTreeSet<String>,
    global: Scope,
    overrides: Vec<(String, Scope)>,
    drops: IntCounterVec,
}

impl RateLimiter {
    /// Build a limiter from config, registering its drop counter in
    /// `registry`.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus` error if the drop counter cannot be
    /// registered (duplicate name in the registry).
    pub fn new(config: &RateLimitConfig, registry: &Registry) -> prometheus::Result<Self> {
        let drops = IntCounterVec::new(
            Opts::new(
                "convoy_rate_limit_drops_total",
                "Requests rejected by the rate limiter",
            ),
            &["prefix"],
        )?;
        registry.register(Box::new(drops.clone()))?;

        let overrides = config
            .overrides
            .iter()
            .map(|o| {
                (
                    o.prefix.clone(),
                    Scope::new(o.prefix.clone(), o.rpm, o.burst),
                )
            })
            .collect();

        Ok(Self {
            key_header: config.key_header.clone(),
            whitelist: config.whitelist.iter().cloned().collect(),
            global: Scope::new("global", config.rpm, config.burst),
            overrides,
            drops,
        })
    }

    /// The configured key header, for the transport layer to extract.
    #[must_use]
    pub fn key_header(&self) -> Option<&str> {
        self.key_header.as_deref()
    }

    /// Decide whether to admit a request from `key` to `path`.
    pub fn check(&self, key: &str, path: &str) -> Decision {
        self.check_at(key, path, Instant::now())
    }

    /// [`RateLimiter::check`] with an explicit clock, for tests.
    pub fn check_at(&self, key: &str, path: &str, now: Instant) -> Decision {
        if self.whitelist.contains(key) {
            return Decision::Admit;
        }

        // First matching prefix wins; no match falls through to global.
        let scope = self
            .overrides
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map_or(&self.global, |(_, scope)| scope);

        let decision = scope.check(key, now);
        if let Decision::Reject { retry_after_secs } = decision {
            self.drops.with_label_values(&[scope.label.as_str()]).inc();
            debug!(key, path, scope = %scope.label, retry_after_secs, "Rate limit drop");
        }
        decision
    }

    /// Total drops recorded for a scope label (diagnostics and tests).
    #[must_use]
    pub fn drops_for(&self, label: &str) -> u64 {
        self.drops.with_label_values(&[label]).get()
    }
}

/// Derive the client key: the configured header when present (left-most
/// address for `X-Forwarded-For`), else the remote address.
#[must_use]
pub fn client_key(
    configured_header: Option<&str>,
    header_value: Option<&str>,
    remote: &str,
) -> String {
    if let (Some(header), Some(value)) = (configured_header, header_value) {
        let value = value.trim();
        if !value.is_empty() {
            if header.eq_ignore_ascii_case("x-forwarded-for") {
                if let Some(first) = value.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            } else {
                return value.to_string();
            }
        }
    }
    remote.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_config::PathOverride;
    use std::time::Duration;

    fn limiter(config: &RateLimitConfig) -> RateLimiter {
        RateLimiter::new(config, &Registry::new()).unwrap()
    }

    #[test]
    fn burst_then_reject_with_retry_after() {
        // rpm=60, burst=10: 11 requests in one second -> 10 admitted,
        // 1 rejected with retry_after=1.
        let config = RateLimitConfig {
            rpm: 60,
            burst: Some(10),
            ..RateLimitConfig::default()
        };
        let limiter = limiter(&config);
        let now = Instant::now();

        let mut admitted = 0;
        let mut rejected = Vec::new();
        for i in 0..11u64 {
            let at = now + Duration::from_millis(i * 90);
            match limiter.check_at("k", "/chat", at) {
                Decision::Admit => admitted += 1,
                Decision::Reject { retry_after_secs } => rejected.push(retry_after_secs),
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(rejected, vec![1]);
        assert_eq!(limiter.drops_for("global"), 1);
    }

    #[test]
    fn admitted_requests_bounded_by_capacity_plus_refill() {
        let config = RateLimitConfig {
            rpm: 120, // 2/sec
            burst: Some(5),
            ..RateLimitConfig::default()
        };
        let limiter = limiter(&config);
        let now = Instant::now();

        // Hammer for 3 seconds at 100 req/sec.
        let mut admitted = 0u64;
        for i in 0..300u64 {
            let at = now + Duration::from_millis(i * 10);
            if limiter.check_at("k", "/", at).is_admit() {
                admitted += 1;
            }
        }
        // c + ceil(r * t) = 5 + 6 = 11.
        assert!(admitted <= 11, "admitted {admitted} > bound 11");
        assert!(admitted >= 10);
    }

    #[test]
    fn override_prefix_wins_and_labels_drops() {
        let config = RateLimitConfig {
            rpm: 6000,
            overrides: vec![PathOverride {
                prefix: "/api/export".to_string(),
                rpm: 60,
                burst: Some(1),
            }],
            ..RateLimitConfig::default()
        };
        let limiter = limiter(&config);
        let now = Instant::now();

        assert!(limiter.check_at("k", "/api/export/csv", now).is_admit());
        assert!(!limiter.check_at("k", "/api/export/csv", now).is_admit());
        assert_eq!(limiter.drops_for("/api/export"), 1);
        assert_eq!(limiter.drops_for("global"), 0);

        // Unmatched paths use the (generous) global scope.
        assert!(limiter.check_at("k", "/chat", now).is_admit());
    }

    #[test]
    fn whitelisted_keys_bypass() {
        let mut config = RateLimitConfig {
            rpm: 60,
            burst: Some(1),
            ..RateLimitConfig::default()
        };
        config.whitelist.insert("10.0.0.9".to_string());
        let limiter = limiter(&config);
        let now = Instant::now();

        for _ in 0..100 {
            assert!(limiter.check_at("10.0.0.9", "/", now).is_admit());
        }
    }

    #[test]
    fn keys_are_isolated() {
        let config = RateLimitConfig {
            rpm: 60,
            burst: Some(1),
            ..RateLimitConfig::default()
        };
        let limiter = limiter(&config);
        let now = Instant::now();

        assert!(limiter.check_at("a", "/", now).is_admit());
        assert!(!limiter.check_at("a", "/", now).is_admit());
        assert!(limiter.check_at("b", "/", now).is_admit());
    }

    #[test]
    fn client_key_prefers_configured_header() {
        assert_eq!(
            client_key(Some("X-Client-Id"), Some("abc"), "1.2.3.4"),
            "abc"
        );
        assert_eq!(
            client_key(
                Some("X-Forwarded-For"),
                Some("9.9.9.9, 10.0.0.1"),
                "1.2.3.4"
            ),
            "9.9.9.9"
        );
        assert_eq!(client_key(Some("X-Client-Id"), None, "1.2.3.4"), "1.2.3.4");
        assert_eq!(client_key(None, Some("ignored"), "1.2.3.4"), "1.2.3.4");
        assert_eq!(client_key(Some("X-Client-Id"), Some("  "), "1.2.3.4"), "1.2.3.4");
    }
}
