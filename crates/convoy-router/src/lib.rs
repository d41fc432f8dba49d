//! Convoy Router - the inbound message pipeline.
//!
//! Every frame a reader pulls off a socket lands here. The pipeline per
//! customer message: validate, persist (best-effort), run the channel
//! adapter, then either hand the frame to the session's operator or ask
//! the AI resolver and evaluate the escalation policy. Operator frames
//! relay back into their sessions and drive explicit transfers.
//!
//! The router is stateless per call apart from the per-session AI
//! answer counters feeding the escalation persistence rule; any number
//! of router workers may share one instance.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod adapter;
mod escalation;
mod router;

pub use adapter::{AdapterRegistry, AdapterStats, ChannelAdapter, Classification, DuplicateAdapter};
pub use escalation::{EscalationDecision, EscalationPolicy};
pub use router::{Router, RouterDeps, run_router_loop};
