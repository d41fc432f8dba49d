//! Convoy Hub - the single-process coordinator for live sockets.
//!
//! The hub owns every connected client. All registry mutations happen
//! on one run-loop task fed by a command channel, so attach, detach,
//! fan-out, and broadcast are serialized without locks. Each client
//! carries a bounded outbound queue drained by a transport-owned writer
//! task; on overflow the oldest frame is dropped and counted.
//!
//! Transport stays outside: the gateway parses socket frames, pushes
//! them into the hub's inbound channel for the router, and drains each
//! client's outbound queue to the wire.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod client;
mod hub;

pub use client::{ClientQueue, ClientTag, Outbound, QueuePush};
pub use hub::{AttachedClient, ClientMeta, Hub, HubError, HubSnapshot, Inbound};
