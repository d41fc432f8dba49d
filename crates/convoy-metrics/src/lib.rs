//! Convoy Metrics - counters, gauges, exposition, and ingestion.
//!
//! One process-wide [`Metrics`] handle owns the `prometheus` registry
//! and the named series the runtime updates (uptime, live sockets,
//! WebRTC peers, AI query counts and latency, hub drop counters). The
//! text exposition renders `# HELP` / `# TYPE` lines and one line per
//! label set; label values with embedded quotes are backslash-escaped
//! by the encoder.
//!
//! The ingestion half accepts batches of client-side metrics; only
//! whitelisted names are counted, labeled by `source` / `tenant` /
//! `session`. Unknown names are dropped without an error (a dedicated
//! counter records how many).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod ingest;
mod registry;

pub use ingest::{ClientMetric, ClientMetricsBatch, IngestReport, Ingestor};
pub use registry::{Metrics, MetricsError, MetricsResult};
