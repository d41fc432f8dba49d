//! Ingestion of client-side metrics.
//!
//! Browser widgets and channel bridges push `{source, tenant?, session?,
//! metrics: [...]}` batches. Only whitelisted names become series; each
//! is a counter labeled by `source`, `tenant`, and `session`.

use std::collections::{BTreeSet, HashMap};

use prometheus::{CounterVec, IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::registry::MetricsResult;

/// One client-reported metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetric {
    /// Metric name; must be whitelisted to count.
    pub name: String,
    /// Increment value.
    pub value: f64,
    /// Extra labels; ignored (only source/tenant/session are kept, so
    /// the label space stays bounded).
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A batch of client metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetricsBatch {
    /// Reporting component ("widget", "telegram-bridge", ...).
    pub source: String,
    /// Optional tenant tag.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Optional session tag.
    #[serde(default)]
    pub session: Option<String>,
    /// The samples.
    pub metrics: Vec<ClientMetric>,
}

/// What happened to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Samples counted.
    pub accepted: usize,
    /// Samples dropped (unknown name or non-finite value).
    pub dropped: usize,
}

/// Accepts client metric batches against a whitelist.
pub struct Ingestor {
    whitelist: BTreeSet<String>,
    series: HashMap<String, CounterVec>,
    dropped: IntCounterVec,
}

impl Ingestor {
    /// Create an ingestor, registering one series per whitelisted name.
    ///
    /// # Errors
    ///
    /// Returns an error if a series cannot be registered.
    pub fn new(whitelist: &BTreeSet<String>, registry: &Registry) -> MetricsResult<Self> {
        let mut series = HashMap::new();
        for name in whitelist {
            let counter = CounterVec::new(
                Opts::new(
                    format!("convoy_client_{name}"),
                    format!("Client-reported metric: {name}"),
                ),
                &["source", "tenant", "session"],
            )?;
            registry.register(Box::new(counter.clone()))?;
            series.insert(name.clone(), counter);
        }

        let dropped = IntCounterVec::new(
            Opts::new(
                "convoy_ingest_dropped_total",
                "Client metric samples dropped by the whitelist",
            ),
            &["source"],
        )?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            whitelist: whitelist.clone(),
            series,
            dropped,
        })
    }

    /// Apply a batch. Unknown names are dropped without an error.
    pub fn apply(&self, batch: &ClientMetricsBatch) -> IngestReport {
        let tenant = batch.tenant.as_deref().unwrap_or("");
        let session = batch.session.as_deref().unwrap_or("");

        let mut accepted = 0;
        let mut dropped = 0;
        for metric in &batch.metrics {
            let known = self.whitelist.contains(&metric.name);
            if !known || !metric.value.is_finite() || metric.value < 0.0 {
                trace!(name = %metric.name, source = %batch.source, "Dropping client metric");
                self.dropped.with_label_values(&[batch.source.as_str()]).inc();
                dropped += 1;
                continue;
            }
            if let Some(counter) = self.series.get(&metric.name) {
                counter
                    .with_label_values(&[batch.source.as_str(), tenant, session])
                    .inc_by(metric.value);
                accepted += 1;
            }
        }
        IngestReport { accepted, dropped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist() -> BTreeSet<String> {
        ["widget_loads", "rtc_setup_ms"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn batch(names: &[(&str, f64)]) -> ClientMetricsBatch {
        ClientMetricsBatch {
            source: "widget".into(),
            tenant: Some("acme".into()),
            session: None,
            metrics: names
                .iter()
                .map(|(name, value)| ClientMetric {
                    name: (*name).to_string(),
                    value: *value,
                    labels: HashMap::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn whitelisted_names_count_with_labels() {
        let registry = Registry::new();
        let ingestor = Ingestor::new(&whitelist(), &registry).unwrap();

        let report = ingestor.apply(&batch(&[("widget_loads", 2.0), ("widget_loads", 1.0)]));
        assert_eq!(report.accepted, 2);
        assert_eq!(report.dropped, 0);

        let families = registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "convoy_client_widget_loads")
            .unwrap();
        let metric = &family.get_metric()[0];
        assert!((metric.get_counter().get_value() - 3.0).abs() < f64::EPSILON);
        let labels: HashMap<_, _> = metric
            .get_label()
            .iter()
            .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
            .collect();
        assert_eq!(labels.get("source").map(String::as_str), Some("widget"));
        assert_eq!(labels.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(labels.get("session").map(String::as_str), Some(""));
    }

    #[test]
    fn unknown_names_are_silently_dropped_but_counted() {
        let registry = Registry::new();
        let ingestor = Ingestor::new(&whitelist(), &registry).unwrap();

        let report = ingestor.apply(&batch(&[("made_up_metric", 5.0), ("rtc_setup_ms", 1.0)]));
        assert_eq!(report.accepted, 1);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn non_finite_and_negative_values_are_dropped() {
        let registry = Registry::new();
        let ingestor = Ingestor::new(&whitelist(), &registry).unwrap();

        let report = ingestor.apply(&batch(&[
            ("widget_loads", f64::NAN),
            ("widget_loads", -1.0),
        ]));
        assert_eq!(report.accepted, 0);
        assert_eq!(report.dropped, 2);
    }
}
