//! The AI backend trait.

use std::time::Duration;

use async_trait::async_trait;

use convoy_core::Message;

use crate::error::{ResolverError, ResolverResult};

/// Per-call options.
#[derive(Debug, Clone, Copy)]
pub struct CompleteOptions {
    /// Hard deadline for the call.
    pub timeout: Duration,
    /// Sampling temperature.
    pub temperature: f64,
}

impl Default for CompleteOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            temperature: 0.7,
        }
    }
}

/// A backend answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Answer text.
    pub content: String,
    /// Backend-reported confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A reasoning backend the resolver can query.
///
/// Implementations must honor `options.timeout`: the resolver also
/// enforces it from the outside, but a cooperative backend cancels its
/// own work instead of leaking it.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Backend name, for logs and stats.
    fn name(&self) -> &str;

    /// Answer `query` given the recent session `history`.
    async fn complete(
        &self,
        query: &str,
        history: &[Message],
        options: &CompleteOptions,
    ) -> ResolverResult<Completion>;

    /// Mirror a knowledge document into the backend, returning its
    /// remote id. Optional capability.
    async fn upload(&self, _title: &str, _content: &str, _tags: &[String]) -> ResolverResult<i64> {
        Err(ResolverError::Unsupported("upload"))
    }
}
