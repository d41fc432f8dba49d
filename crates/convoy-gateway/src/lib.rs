//! Convoy Gateway - the daemon tying the runtime together.
//!
//! One process hosts the whole session fabric:
//!
//! - the axum HTTP surface: WebSocket ingress (`/ws`), metrics
//!   exposition and ingestion, health, and a small admin API;
//! - the connection hub run-loop and one reader/writer task pair per
//!   socket;
//! - the background loops: router ingress, waiting-queue drain, SLA
//!   scan, automation, and the dashboard metrics tick.
//!
//! Shutdown is a drain: a signal stops new attaches, flushes outbound
//! queues up to the configured deadline, closes sockets, then cancels
//! the background loops.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod health;
mod server;
mod state;

pub use error::ApiError;
pub use health::{HealthCheck, HealthState, HealthStatus};
pub use server::build_app;
pub use state::AppState;
