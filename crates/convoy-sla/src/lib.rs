//! Convoy SLA - deadline contracts and the violation scan.
//!
//! Every scan pass walks the open tickets, finds the most specific
//! active [`SlaConfig`] for each (tier-specific beats the priority
//! default), computes the first-response and resolution deadlines
//! (business-hours aware when the config demands), and records one
//! violation per missed deadline. New violations notify the automation
//! engine (`sla-violated` event) and the owning operator plus their
//! department channel through the hub.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod deadline;
mod monitor;

pub use deadline::{add_business_minutes, deadline_for, match_config};
pub use monitor::{SlaMonitor, run_sla_loop};
