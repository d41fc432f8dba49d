//! Convoy Resolver - AI answers with a circuit breaker and a local
//! fallback.
//!
//! Two backends compose: the *primary* reasoning backend (external,
//! reached over HTTP through the [`AiBackend`] trait) and a *fallback*
//! keyword-ranked knowledge base (in-process). A circuit breaker
//! watches primary failures in a sliding window; while it is open,
//! primary calls are never issued and every query answers from the
//! fallback. Each call records its outcome and latency; an exponential
//! moving average of latency is exposed through the metrics registry.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod backend;
mod breaker;
mod error;
mod http;
mod kb;
mod resolver;

pub use backend::{AiBackend, Completion, CompleteOptions};
pub use breaker::{Admission, BreakerSnapshot, CircuitBreaker};
pub use error::{ResolverError, ResolverResult};
pub use http::HttpBackend;
pub use kb::KeywordKb;
pub use resolver::{Answer, Resolver, ResolverStats};
