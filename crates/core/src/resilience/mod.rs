//! # Resilience Wrapper
//!
//! Retry with exponential backoff plus a per-dependency circuit breaker,
//! composed over any async external call.
//!
//! ```text
//! call ─▶ breaker.acquire ─▶ timeout(op) ─▶ classify ─┬─▶ Ok
//!            │ open                                    ├─▶ retriable: backoff, loop
//!            ▼                                         └─▶ fatal: propagate
//!       CircuitOpen (no attempt consumed)
//! ```

pub mod breaker;
pub mod retry;

pub use breaker::{
    BreakerConfig, BreakerPermit, BreakerRegistry, BreakerState, CircuitBreaker, CircuitOpen,
};
pub use retry::RetryPolicy;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::InvocationError;

/// How an attempt's error should be treated
pub trait Classify {
    /// Worth another attempt
    fn is_retriable(&self) -> bool;
    /// Counts as a dependency failure for the breaker
    fn trips_breaker(&self) -> bool;
    /// Build the error for an attempt that hit the hard timeout
    fn timed_out(after: Duration) -> Self;
}

impl Classify for InvocationError {
    fn is_retriable(&self) -> bool {
        match self {
            Self::Model(e) => e.is_retriable(),
            Self::Timeout(_) => true,
            Self::InvalidOutput { regenerate, .. } => *regenerate,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            Self::Model(e) => e.is_retriable(),
            Self::Timeout(_) => true,
            // The model answered; the answer was just unusable
            Self::InvalidOutput { .. } => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Why a guarded call gave up
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceError<E> {
    /// Breaker refused the call; `attempts` made before it opened
    CircuitOpen { dependency: String, attempts: u32 },
    /// Retriable failures used up the whole budget
    Exhausted { attempts: u32, last: E },
    /// Non-retriable failure, propagated immediately
    Rejected { attempts: u32, error: E },
}

/// Serializable knobs, embedded in `CoordinatorConfig`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// Hard timeout per model call
    pub call_timeout_secs: u64,
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_ms: 250,
            call_timeout_secs: 90,
            failure_threshold: 5,
            failure_window_secs: 60,
            cooldown_secs: 30,
        }
    }
}

impl ResilienceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            failure_window: Duration::from_secs(self.failure_window_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

/// Retry + breaker wrapper, independent of any agent logic
#[derive(Debug)]
pub struct Resilient {
    policy: RetryPolicy,
    call_timeout: Duration,
    breakers: BreakerRegistry,
}

impl Resilient {
    pub fn new(policy: RetryPolicy, call_timeout: Duration, breaker: BreakerConfig) -> Self {
        Self {
            policy,
            call_timeout,
            breakers: BreakerRegistry::new(breaker),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            config.retry_policy(),
            config.call_timeout(),
            config.breaker_config(),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Run `op` against `dependency` under retry and breaker rules.
    ///
    /// `op` receives the 1-based attempt number. `on_retry` is told the next
    /// attempt number and the delay before it. Returns the value and the
    /// number of attempts it took.
    pub async fn call<T, E, F, Fut, R>(
        &self,
        dependency: &str,
        mut op: F,
        mut on_retry: R,
    ) -> Result<(T, u32), ResilienceError<E>>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32, &E, Duration),
    {
        let breaker = self.breakers.get(dependency);
        let max_attempts = self.policy.attempts();

        for attempt in 1..=max_attempts {
            let permit = match breaker.acquire() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(dependency, attempt, "circuit open, failing fast");
                    return Err(ResilienceError::CircuitOpen {
                        dependency: dependency.to_string(),
                        attempts: attempt - 1,
                    });
                }
            };

            // Dropping this future mid-call drops the permit unsettled
            let error = match tokio::time::timeout(self.call_timeout, op(attempt)).await {
                Ok(Ok(value)) => {
                    permit.success();
                    return Ok((value, attempt));
                }
                Ok(Err(e)) => e,
                Err(_) => E::timed_out(self.call_timeout),
            };

            if error.trips_breaker() {
                permit.failure();
            } else {
                permit.success();
            }

            if !error.is_retriable() {
                return Err(ResilienceError::Rejected {
                    attempts: attempt,
                    error,
                });
            }
            if attempt == max_attempts {
                tracing::error!(dependency, attempts = attempt, error = %error, "retries exhausted");
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.delay_for(attempt - 1);
            tracing::warn!(
                dependency,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retriable failure, backing off"
            );
            on_retry(attempt + 1, &error, delay);
            tokio::time::sleep(delay).await;
        }

        unreachable!("retry loop always returns within max_attempts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelError, ValidationError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn resilient(max_attempts: u32, threshold: u32) -> Resilient {
        Resilient::new(
            RetryPolicy::immediate(max_attempts),
            Duration::from_secs(5),
            BreakerConfig {
                failure_threshold: threshold,
                failure_window: Duration::from_secs(60),
                cooldown: Duration::from_secs(30),
            },
        )
    }

    fn transient() -> InvocationError {
        InvocationError::Model(ModelError::Transient("503 Service Unavailable".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_minus_one_failures_then_success_makes_n_calls() {
        let r = resilient(4, 10);
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        let rt = retries.clone();
        let result = r
            .call(
                "model",
                move |_attempt| {
                    let c = c.clone();
                    async move {
                        let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                        if n < 4 {
                            Err(transient())
                        } else {
                            Ok("done")
                        }
                    }
                },
                move |_, _, _| {
                    rt.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(result, Ok(("done", 4)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_attempts() {
        let r = resilient(3, 10);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<((), u32), _> = r
            .call(
                "model",
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Err(transient()) }
                },
                |_, _, _| {},
            )
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_propagates_immediately() {
        let r = resilient(5, 10);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<((), u32), _> = r
            .call(
                "model",
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(InvocationError::InvalidOutput {
                            source: ValidationError::new("missing section"),
                            regenerate: false,
                        })
                    }
                },
                |_, _, _| {},
            )
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::Rejected { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Validation failures never count against the dependency
        assert_eq!(r.breakers().get("model").state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retriable() {
        let r = Resilient::new(
            RetryPolicy::immediate(2),
            Duration::from_millis(100),
            BreakerConfig::default(),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = r
            .call(
                "model",
                move |attempt| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 1 {
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                        Ok::<_, InvocationError>(attempt)
                    }
                },
                |_, _, _| {},
            )
            .await;

        assert_eq!(result, Ok((2, 2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_calling() {
        let r = resilient(1, 2);
        for _ in 0..2 {
            let _: Result<((), u32), _> = r
                .call("model", |_| async { Err(transient()) }, |_, _, _| {})
                .await;
        }

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<((), u32), _> = r
            .call(
                "model",
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, InvocationError>(()) }
                },
                |_, _, _| {},
            )
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::CircuitOpen { attempts: 0, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // After cooldown one success closes the breaker again
        tokio::time::advance(Duration::from_secs(30)).await;
        let result = r.call("model", |_| async { Ok::<_, InvocationError>(()) }, |_, _, _| {}).await;
        assert_eq!(result, Ok(((), 1)));
        assert_eq!(r.breakers().get("model").state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_retry_stops_the_loop() {
        let r = resilient(5, 2);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<((), u32), _> = r
            .call(
                "model",
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Err(transient()) }
                },
                |_, _, _| {},
            )
            .await;

        assert!(matches!(
            result,
            Err(ResilienceError::CircuitOpen { attempts: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_does_not_wedge_breaker() {
        let r = resilient(1, 2);
        for _ in 0..2 {
            let _: Result<((), u32), _> = r
                .call("model", |_| async { Err(transient()) }, |_, _, _| {})
                .await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        // The caller gives up on the trial before the model answers
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            r.call(
                "model",
                |_| std::future::pending::<Result<(), InvocationError>>(),
                |_, _, _| {},
            ),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(r.breakers().get("model").state(), BreakerState::HalfOpen);

        let result = r
            .call("model", |_| async { Ok::<_, InvocationError>(()) }, |_, _, _| {})
            .await;
        assert_eq!(result, Ok(((), 1)));
        assert_eq!(r.breakers().get("model").state(), BreakerState::Closed);
    }
}
