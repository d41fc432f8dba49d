//! The process-wide metric registry and the runtime's named series.

use std::time::Instant;

use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors raised while registering or rendering metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A series could not be created or registered.
    #[error("metrics registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    /// Rendering the exposition text failed.
    #[error("metrics encoding failed: {0}")]
    Encoding(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// The runtime's metric handle. Cheap to clone; all clones share the
/// same registry and series.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,

    /// Seconds since process start.
    pub uptime_seconds: IntGauge,
    /// Currently attached socket clients.
    pub active_sockets: IntGauge,
    /// Live WebRTC peer connections (signalled through the hub).
    pub webrtc_peers: IntGauge,
    /// AI queries by outcome source: `primary` or `fallback`.
    pub ai_queries: IntCounterVec,
    /// Exponential moving average of AI call latency, seconds.
    pub ai_latency_ema: Gauge,
    /// Frames dropped from full per-client outbound queues.
    pub hub_dropped_frames: IntCounterVec,
    /// Inbound frames with unrecognised types.
    pub hub_unknown_frames: IntCounterVec,
}

impl Metrics {
    /// Create the registry and register every runtime series.
    ///
    /// # Errors
    ///
    /// Returns an error if any series clashes with one already
    /// registered (only possible if called twice on one registry).
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();

        let uptime_seconds = IntGauge::new("convoy_uptime_seconds", "Seconds since start")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let active_sockets =
            IntGauge::new("convoy_active_sockets", "Currently attached socket clients")?;
        registry.register(Box::new(active_sockets.clone()))?;

        let webrtc_peers =
            IntGauge::new("convoy_webrtc_peers", "Live WebRTC peer connections")?;
        registry.register(Box::new(webrtc_peers.clone()))?;

        let ai_queries = IntCounterVec::new(
            Opts::new("convoy_ai_queries_total", "AI queries by answer source"),
            &["source"],
        )?;
        registry.register(Box::new(ai_queries.clone()))?;

        let ai_latency_ema = Gauge::new(
            "convoy_ai_latency_seconds",
            "Exponential moving average of AI call latency",
        )?;
        registry.register(Box::new(ai_latency_ema.clone()))?;

        let hub_dropped_frames = IntCounterVec::new(
            Opts::new(
                "convoy_hub_dropped_frames_total",
                "Frames dropped from full outbound queues",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(hub_dropped_frames.clone()))?;

        let hub_unknown_frames = IntCounterVec::new(
            Opts::new(
                "convoy_hub_unknown_frames_total",
                "Inbound frames with unrecognised types",
            ),
            &["platform"],
        )?;
        registry.register(Box::new(hub_unknown_frames.clone()))?;

        Ok(Self {
            registry,
            started_at: Instant::now(),
            uptime_seconds,
            active_sockets,
            webrtc_peers,
            ai_queries,
            ai_latency_ema,
            hub_dropped_frames,
            hub_unknown_frames,
        })
    }

    /// The underlying registry, for components that register their own
    /// series (rate limiter, ingestor).
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Refresh the uptime gauge.
    pub fn tick_uptime(&self) {
        let secs = self.started_at.elapsed().as_secs();
        self.uptime_seconds
            .set(i64::try_from(secs).unwrap_or(i64::MAX));
    }

    /// Render the text exposition.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding fails (should not happen with the
    /// text encoder).
    pub fn render(&self) -> MetricsResult<String> {
        self.tick_uptime();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_has_help_and_type_lines() {
        let metrics = Metrics::new().unwrap();
        metrics.active_sockets.set(3);
        metrics.ai_queries.with_label_values(&["primary"]).inc();
        metrics.ai_queries.with_label_values(&["fallback"]).inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("# HELP convoy_active_sockets"));
        assert!(text.contains("# TYPE convoy_active_sockets gauge"));
        assert!(text.contains("convoy_active_sockets 3"));
        assert!(text.contains("# TYPE convoy_ai_queries_total counter"));
        assert!(text.contains("convoy_ai_queries_total{source=\"primary\"} 1"));
        assert!(text.contains("convoy_ai_queries_total{source=\"fallback\"} 1"));
    }

    #[test]
    fn label_quotes_are_escaped() {
        let metrics = Metrics::new().unwrap();
        metrics
            .hub_unknown_frames
            .with_label_values(&["we\"chat"])
            .inc();

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"platform="we\"chat""#));
    }

    #[test]
    fn uptime_is_rendered() {
        let metrics = Metrics::new().unwrap();
        let text = metrics.render().unwrap();
        assert!(text.contains("convoy_uptime_seconds"));
    }
}
