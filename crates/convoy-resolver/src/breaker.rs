//! Circuit breaker over the primary backend.
//!
//! State machine: `closed → open → half-open → closed`. Closed counts
//! failures in a sliding window; enough failures open the breaker for a
//! retry-after period. Open short-circuits every call. After the
//! period, half-open admits exactly one trial call: success closes the
//! breaker, failure re-opens it with the retry-after doubled up to a
//! cap.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use convoy_config::BreakerConfig;

/// What the breaker says about issuing a primary call now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed: call freely.
    Allow,
    /// Breaker half-open: this caller holds the single trial slot and
    /// must report the outcome.
    AllowTrial,
    /// Breaker open (or trial already in flight): do not call.
    ShortCircuit,
}

/// Tagged breaker state. Counters live inside the variant they belong
/// to, so impossible combinations (open with a failure window) cannot
/// be represented.
#[derive(Debug)]
enum State {
    Closed { failures: VecDeque<Instant> },
    Open { until: Instant, retry: Duration },
    HalfOpen { trial_in_flight: bool, retry: Duration },
}

/// Observable breaker status, for health checks and admin surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerSnapshot {
    /// Accepting primary calls.
    Closed,
    /// Short-circuiting; seconds until the next trial.
    Open {
        /// Seconds until half-open.
        reopens_in_secs: u64,
    },
    /// One trial call decides what happens next.
    HalfOpen,
}

/// The breaker. Cheap atomic-free hot path: one mutex, held only for
/// the transition logic, never across a call.
pub struct CircuitBreaker {
    state: Mutex<State>,
    window: Duration,
    failure_threshold: usize,
    base_retry: Duration,
    max_retry: Duration,
}

impl CircuitBreaker {
    /// Build from config.
    #[must_use]
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: Mutex::new(State::Closed {
                failures: VecDeque::new(),
            }),
            window: Duration::from_secs(config.window_secs),
            failure_threshold: config.failure_threshold as usize,
            base_retry: Duration::from_secs(config.retry_after_secs),
            max_retry: Duration::from_secs(config.max_retry_after_secs),
        }
    }

    /// Ask to issue a primary call.
    pub fn try_acquire(&self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// [`CircuitBreaker::try_acquire`] with an explicit clock.
    pub fn try_acquire_at(&self, now: Instant) -> Admission {
        let mut state = self.lock();
        match &mut *state {
            State::Closed { .. } => Admission::Allow,
            State::Open { until, retry } => {
                if now >= *until {
                    let retry = *retry;
                    info!("Circuit breaker half-open, admitting trial call");
                    *state = State::HalfOpen {
                        trial_in_flight: true,
                        retry,
                    };
                    Admission::AllowTrial
                } else {
                    Admission::ShortCircuit
                }
            }
            State::HalfOpen { trial_in_flight, .. } => {
                if *trial_in_flight {
                    Admission::ShortCircuit
                } else {
                    *trial_in_flight = true;
                    Admission::AllowTrial
                }
            }
        }
    }

    /// Report a successful primary call.
    pub fn on_success(&self) {
        self.on_success_at(Instant::now());
    }

    /// [`CircuitBreaker::on_success`] with an explicit clock.
    pub fn on_success_at(&self, _now: Instant) {
        let mut state = self.lock();
        match &mut *state {
            State::Closed { failures } => failures.clear(),
            State::HalfOpen { .. } | State::Open { .. } => {
                info!("Circuit breaker closed after successful trial");
                *state = State::Closed {
                    failures: VecDeque::new(),
                };
            }
        }
    }

    /// Report a failed primary call.
    pub fn on_failure(&self) {
        self.on_failure_at(Instant::now());
    }

    /// [`CircuitBreaker::on_failure`] with an explicit clock.
    pub fn on_failure_at(&self, now: Instant) {
        let mut state = self.lock();
        match &mut *state {
            State::Closed { failures } => {
                failures.push_back(now);
                while let Some(oldest) = failures.front() {
                    if now.duration_since(*oldest) > self.window {
                        failures.pop_front();
                    } else {
                        break;
                    }
                }
                if failures.len() >= self.failure_threshold {
                    warn!(
                        failures = failures.len(),
                        retry_secs = self.base_retry.as_secs(),
                        "Circuit breaker opened"
                    );
                    *state = State::Open {
                        until: now + self.base_retry,
                        retry: self.base_retry,
                    };
                }
            }
            State::HalfOpen { retry, .. } => {
                let doubled = retry.saturating_mul(2).min(self.max_retry);
                warn!(
                    retry_secs = doubled.as_secs(),
                    "Circuit breaker re-opened after failed trial"
                );
                *state = State::Open {
                    until: now + doubled,
                    retry: doubled,
                };
            }
            State::Open { .. } => {
                // Late failure report from a call issued before the trip;
                // nothing to update.
            }
        }
    }

    /// Administrative reset to closed.
    pub fn force_reset(&self) {
        let mut state = self.lock();
        info!("Circuit breaker force-reset");
        *state = State::Closed {
            failures: VecDeque::new(),
        };
    }

    /// Current state for health/admin surfaces.
    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// [`CircuitBreaker::snapshot`] with an explicit clock.
    pub fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let state = self.lock();
        match &*state {
            State::Closed { .. } => BreakerSnapshot::Closed,
            State::Open { until, .. } => BreakerSnapshot::Open {
                reopens_in_secs: until.saturating_duration_since(now).as_secs(),
            },
            State::HalfOpen { .. } => BreakerSnapshot::HalfOpen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            window_secs: 30,
            failure_threshold: 5,
            retry_after_secs: 30,
            max_retry_after_secs: 240,
        })
    }

    #[test]
    fn five_failures_in_window_open_the_breaker() {
        let b = breaker();
        let t0 = Instant::now();

        for i in 0..4 {
            b.on_failure_at(t0 + Duration::from_secs(i));
            assert_eq!(b.try_acquire_at(t0 + Duration::from_secs(i)), Admission::Allow);
        }
        b.on_failure_at(t0 + Duration::from_secs(4));

        // Open: short-circuit for the whole retry-after window.
        assert_eq!(
            b.try_acquire_at(t0 + Duration::from_secs(5)),
            Admission::ShortCircuit
        );
        assert_eq!(
            b.try_acquire_at(t0 + Duration::from_secs(33)),
            Admission::ShortCircuit
        );
    }

    #[test]
    fn failures_outside_window_do_not_count() {
        let b = breaker();
        let t0 = Instant::now();

        // Four old failures, then a long gap, then one more: window has
        // pruned the old ones.
        for i in 0..4 {
            b.on_failure_at(t0 + Duration::from_secs(i));
        }
        b.on_failure_at(t0 + Duration::from_secs(120));
        assert_eq!(
            b.try_acquire_at(t0 + Duration::from_secs(121)),
            Admission::Allow
        );
    }

    #[test]
    fn half_open_admits_one_trial_then_closes_on_success() {
        let b = breaker();
        let t0 = Instant::now();
        for i in 0..5 {
            b.on_failure_at(t0 + Duration::from_secs(i));
        }

        let after = t0 + Duration::from_secs(35);
        assert_eq!(b.try_acquire_at(after), Admission::AllowTrial);
        // Second caller while the trial is in flight.
        assert_eq!(b.try_acquire_at(after), Admission::ShortCircuit);

        b.on_success_at(after + Duration::from_secs(1));
        assert_eq!(b.snapshot_at(after + Duration::from_secs(1)), BreakerSnapshot::Closed);
        assert_eq!(
            b.try_acquire_at(after + Duration::from_secs(2)),
            Admission::Allow
        );
    }

    #[test]
    fn failed_trial_doubles_retry_up_to_cap() {
        let b = breaker();
        let mut now = Instant::now();
        for i in 0..5 {
            b.on_failure_at(now + Duration::from_secs(i));
        }
        now += Duration::from_secs(5);

        let mut expected_retry = 30u64;
        for _ in 0..5 {
            // Wait out the current retry period, fail the trial.
            now += Duration::from_secs(expected_retry);
            assert_eq!(b.try_acquire_at(now), Admission::AllowTrial);
            b.on_failure_at(now);
            expected_retry = (expected_retry * 2).min(240);

            match b.snapshot_at(now) {
                BreakerSnapshot::Open { reopens_in_secs } => {
                    assert_eq!(reopens_in_secs, expected_retry);
                }
                other => panic!("expected open, got {other:?}"),
            }
        }
        // Capped at 240.
        assert_eq!(expected_retry, 240);
    }

    #[test]
    fn force_reset_closes_immediately() {
        let b = breaker();
        let t0 = Instant::now();
        for i in 0..5 {
            b.on_failure_at(t0 + Duration::from_secs(i));
        }
        assert_eq!(b.try_acquire_at(t0 + Duration::from_secs(6)), Admission::ShortCircuit);

        b.force_reset();
        assert_eq!(b.try_acquire_at(t0 + Duration::from_secs(7)), Admission::Allow);
    }
}
