//! Convoy Limit - per-key token-bucket rate limiting.
//!
//! Each client key gets a bucket per scope. The global scope applies
//! unless a per-path override's prefix matches first. Buckets refill
//! continuously at `rpm / 60` tokens per second, capped at the burst
//! capacity (default: one minute's worth of refill). Rejections carry a
//! `Retry-After` computed as `ceil((1 - tokens) / rate)` seconds, and a
//! process-wide counter records drops labeled by the matched prefix.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bucket;
mod limiter;

pub use bucket::TokenBucket;
pub use limiter::{Decision, RateLimiter, RejectBody, client_key};
