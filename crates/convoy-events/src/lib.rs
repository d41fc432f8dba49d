//! Convoy Events - broadcast bus for platform events.
//!
//! Producers (router, assignment engine, SLA monitor) publish
//! [`PlatformEvent`]s; the automation engine and dashboard forwarders
//! subscribe. Delivery is in publish order per subscriber; slow
//! subscribers lag and drop rather than back-pressure producers.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bus;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};

pub use convoy_core::automation::{EventTag, PlatformEvent};
