//! The composed resolver: primary behind the breaker, fallback always
//! ready.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use convoy_config::AiConfig;
use convoy_core::{AnswerSource, Message, SessionId};
use convoy_metrics::Metrics;

use crate::backend::{AiBackend, CompleteOptions};
use crate::breaker::{Admission, BreakerSnapshot, CircuitBreaker};
use crate::error::{ResolverError, ResolverResult};
use crate::kb::KeywordKb;

/// EMA smoothing factor for the latency gauge.
const EMA_ALPHA: f64 = 0.2;

/// A resolved answer, ready to become an `ai-response` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Answer text.
    pub content: String,
    /// Confidence in `[0, 1]`; fallback answers stay at or below 0.7.
    pub confidence: f64,
    /// Which backend produced it.
    pub source: AnswerSource,
}

/// Cumulative call outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Primary calls that returned an answer.
    pub primary_success: u64,
    /// Primary calls that failed or timed out.
    pub primary_fail: u64,
    /// Queries answered by the fallback KB.
    pub fallback_used: u64,
}

/// Queries the primary backend through the circuit breaker and falls
/// back to the keyword KB when it cannot or should not be called.
pub struct Resolver {
    primary: Option<Arc<dyn AiBackend>>,
    fallback: KeywordKb,
    breaker: CircuitBreaker,
    options: CompleteOptions,
    metrics: Metrics,
    latency_ema: Mutex<f64>,
    primary_success: AtomicU64,
    primary_fail: AtomicU64,
    fallback_used: AtomicU64,
}

impl Resolver {
    /// Compose a resolver. `primary = None` (no base URL configured)
    /// sends every query to the fallback.
    #[must_use]
    pub fn new(
        primary: Option<Arc<dyn AiBackend>>,
        fallback: KeywordKb,
        config: &AiConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker: CircuitBreaker::new(&config.breaker),
            options: CompleteOptions {
                timeout: Duration::from_secs(config.timeout_secs),
                temperature: config.temperature,
            },
            metrics,
            latency_ema: Mutex::new(0.0),
            primary_success: AtomicU64::new(0),
            primary_fail: AtomicU64::new(0),
            fallback_used: AtomicU64::new(0),
        }
    }

    /// Answer `query` for `session` given recent `history`.
    ///
    /// # Errors
    ///
    /// Only storage failures in the fallback path surface; primary
    /// failures are absorbed by falling back.
    pub async fn query(
        &self,
        query: &str,
        session: &SessionId,
        history: &[Message],
    ) -> ResolverResult<Answer> {
        if let Some(primary) = &self.primary {
            let admission = self.breaker.try_acquire();
            if admission != Admission::ShortCircuit {
                match self.call_primary(primary.as_ref(), query, history).await {
                    Ok(answer) => return Ok(answer),
                    Err(err) => {
                        warn!(%session, error = %err, "Primary AI failed, using fallback");
                    }
                }
            } else {
                debug!(%session, "Circuit open, skipping primary");
            }
        }

        self.answer_from_fallback(query).await
    }

    async fn call_primary(
        &self,
        primary: &dyn AiBackend,
        query: &str,
        history: &[Message],
    ) -> ResolverResult<Answer> {
        let started = Instant::now();
        let result = timeout(
            self.options.timeout,
            primary.complete(query, history, &self.options),
        )
        .await;

        match result {
            Ok(Ok(completion)) => {
                self.breaker.on_success();
                self.primary_success.fetch_add(1, Ordering::Relaxed);
                self.record_latency(started.elapsed());
                self.metrics.ai_queries.with_label_values(&["primary"]).inc();
                Ok(Answer {
                    content: completion.content,
                    confidence: completion.confidence,
                    source: AnswerSource::Primary,
                })
            }
            Ok(Err(err)) => {
                self.breaker.on_failure();
                self.primary_fail.fetch_add(1, Ordering::Relaxed);
                self.record_latency(started.elapsed());
                Err(err)
            }
            Err(_elapsed) => {
                self.breaker.on_failure();
                self.primary_fail.fetch_add(1, Ordering::Relaxed);
                self.record_latency(started.elapsed());
                Err(ResolverError::Timeout {
                    timeout_secs: self.options.timeout.as_secs(),
                })
            }
        }
    }

    async fn answer_from_fallback(&self, query: &str) -> ResolverResult<Answer> {
        let started = Instant::now();
        let completion = self.fallback.answer(query).await?;
        self.fallback_used.fetch_add(1, Ordering::Relaxed);
        self.record_latency(started.elapsed());
        self.metrics
            .ai_queries
            .with_label_values(&["fallback"])
            .inc();
        Ok(Answer {
            content: completion.content,
            confidence: completion.confidence,
            source: AnswerSource::Fallback,
        })
    }

    fn record_latency(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let mut ema = self
            .latency_ema
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *ema = if *ema == 0.0 {
            secs
        } else {
            (1.0 - EMA_ALPHA) * *ema + EMA_ALPHA * secs
        };
        self.metrics.ai_latency_ema.set(*ema);
    }

    /// Current latency EMA, seconds.
    #[must_use]
    pub fn latency_ema(&self) -> f64 {
        *self
            .latency_ema
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Cumulative outcome counters.
    #[must_use]
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            primary_success: self.primary_success.load(Ordering::Relaxed),
            primary_fail: self.primary_fail.load(Ordering::Relaxed),
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
        }
    }

    /// Breaker state for health/admin surfaces.
    #[must_use]
    pub fn breaker_state(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Administrative breaker reset.
    pub fn force_reset_breaker(&self) {
        self.breaker.force_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use convoy_core::KnowledgeDoc;
    use convoy_storage::{KnowledgeStore, MemoryStore};
    use std::sync::atomic::AtomicU32;

    /// Scripted backend: fails until `fail_remaining` hits zero.
    struct ScriptedBackend {
        fail_remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn failing(n: u32) -> Self {
            Self {
                fail_remaining: AtomicU32::new(n),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _query: &str,
            _history: &[Message],
            _options: &CompleteOptions,
        ) -> ResolverResult<crate::backend::Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                Err(ResolverError::Backend("scripted failure".into()))
            } else {
                Ok(crate::backend::Completion {
                    content: "Use the reset link on the sign-in page.".into(),
                    confidence: 0.92,
                })
            }
        }
    }

    async fn fallback_kb() -> KeywordKb {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_doc(KnowledgeDoc::new(
                0,
                "Reset your password",
                "Use the reset link.",
            ))
            .await
            .unwrap();
        KeywordKb::new(store, 3)
    }

    fn config() -> AiConfig {
        AiConfig {
            base_url: "http://ai.internal".into(),
            ..AiConfig::default()
        }
    }

    #[tokio::test]
    async fn healthy_primary_answers_with_source_primary() {
        let backend = Arc::new(ScriptedBackend::failing(0));
        let resolver = Resolver::new(
            Some(Arc::clone(&backend) as Arc<dyn AiBackend>),
            fallback_kb().await,
            &config(),
            Metrics::new().unwrap(),
        );

        let answer = resolver
            .query("reset password", &SessionId::new(), &[])
            .await
            .unwrap();
        assert_eq!(answer.source, AnswerSource::Primary);
        assert!((answer.confidence - 0.92).abs() < f64::EPSILON);
        assert_eq!(resolver.stats().primary_success, 1);
        assert!(resolver.latency_ema() >= 0.0);
    }

    #[tokio::test]
    async fn primary_failure_falls_back_within_one_query() {
        let backend = Arc::new(ScriptedBackend::failing(1));
        let resolver = Resolver::new(
            Some(Arc::clone(&backend) as Arc<dyn AiBackend>),
            fallback_kb().await,
            &config(),
            Metrics::new().unwrap(),
        );

        let answer = resolver
            .query("reset password", &SessionId::new(), &[])
            .await
            .unwrap();
        assert_eq!(answer.source, AnswerSource::Fallback);
        assert!(answer.confidence <= 0.7);
        let stats = resolver.stats();
        assert_eq!(stats.primary_fail, 1);
        assert_eq!(stats.fallback_used, 1);
    }

    #[tokio::test]
    async fn open_breaker_issues_zero_primary_calls() {
        let backend = Arc::new(ScriptedBackend::failing(u32::MAX));
        let resolver = Resolver::new(
            Some(Arc::clone(&backend) as Arc<dyn AiBackend>),
            fallback_kb().await,
            &config(),
            Metrics::new().unwrap(),
        );
        let session = SessionId::new();

        // Five failing queries trip the breaker.
        for _ in 0..5 {
            let answer = resolver.query("anything", &session, &[]).await.unwrap();
            assert_eq!(answer.source, AnswerSource::Fallback);
        }
        assert_eq!(backend.calls(), 5);
        assert!(matches!(
            resolver.breaker_state(),
            BreakerSnapshot::Open { .. }
        ));

        // The next ten queries must not touch the primary.
        for _ in 0..10 {
            let answer = resolver.query("anything", &session, &[]).await.unwrap();
            assert_eq!(answer.source, AnswerSource::Fallback);
        }
        assert_eq!(backend.calls(), 5);
        assert_eq!(resolver.stats().fallback_used, 15);
    }

    #[tokio::test]
    async fn force_reset_reopens_the_primary_path() {
        let backend = Arc::new(ScriptedBackend::failing(5));
        let resolver = Resolver::new(
            Some(Arc::clone(&backend) as Arc<dyn AiBackend>),
            fallback_kb().await,
            &config(),
            Metrics::new().unwrap(),
        );
        let session = SessionId::new();

        for _ in 0..5 {
            resolver.query("anything", &session, &[]).await.unwrap();
        }
        assert!(matches!(
            resolver.breaker_state(),
            BreakerSnapshot::Open { .. }
        ));

        resolver.force_reset_breaker();
        let answer = resolver.query("anything", &session, &[]).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Primary);
        assert_eq!(backend.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_primary_fail() {
        /// Backend that never answers.
        struct HangingBackend;

        #[async_trait]
        impl AiBackend for HangingBackend {
            fn name(&self) -> &str {
                "hanging"
            }

            async fn complete(
                &self,
                _query: &str,
                _history: &[Message],
                _options: &CompleteOptions,
            ) -> ResolverResult<crate::backend::Completion> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("slept past the deadline")
            }
        }

        let resolver = Resolver::new(
            Some(Arc::new(HangingBackend)),
            fallback_kb().await,
            &config(),
            Metrics::new().unwrap(),
        );

        let answer = resolver
            .query("reset password", &SessionId::new(), &[])
            .await
            .unwrap();
        assert_eq!(answer.source, AnswerSource::Fallback);
        assert_eq!(resolver.stats().primary_fail, 1);
    }

    #[tokio::test]
    async fn no_primary_configured_goes_straight_to_fallback() {
        let resolver = Resolver::new(
            None,
            fallback_kb().await,
            &config(),
            Metrics::new().unwrap(),
        );
        let answer = resolver
            .query("reset password", &SessionId::new(), &[])
            .await
            .unwrap();
        assert_eq!(answer.source, AnswerSource::Fallback);
    }
}
