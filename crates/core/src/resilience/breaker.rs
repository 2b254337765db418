//! # Circuit Breaker
//!
//! Per-dependency fail-fast guard.
//!
//! ```text
//! Closed ──(M consecutive failures in window)──▶ Open
//!   ▲                                             │ cooldown
//!   └──────────── success ──── HalfOpen ◀─────────┘
//!                               │ failure
//!                               └──────────▶ Open
//! ```
//!
//! State lives behind a `std::sync::Mutex` that is never held across an await.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds for a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold
    pub failure_window: Duration,
    /// Time spent open before a trial call is admitted
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Returned when the breaker refuses a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpen {
    pub dependency: String,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker for one external dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                window_start: None,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned breaker is still a valid state machine
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Observable state; an open breaker past its cooldown reports half-open
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(at)) if at.elapsed() >= self.config.cooldown => {
                BreakerState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Ask permission to make one call.
    ///
    /// The permit should be settled with [`BreakerPermit::success`] or
    /// [`BreakerPermit::failure`]. A half-open trial permit dropped unsettled
    /// hands the trial slot back so the next caller may try.
    pub fn acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpen> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return Err(self.open_error());
                }
                tracing::info!(dependency = %self.dependency, "circuit half-open, admitting trial call");
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.open_error());
                }
                inner.trial_in_flight = true;
                true
            }
        };
        Ok(BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen && inner.trial_in_flight {
            tracing::warn!(dependency = %self.dependency, "trial call abandoned, slot released");
            inner.trial_in_flight = false;
        }
    }

    /// The dependency answered
    pub fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(dependency = %self.dependency, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.window_start = None;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// The dependency failed in a way that counts against it
    pub fn on_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            BreakerState::HalfOpen | BreakerState::Open => {
                tracing::warn!(dependency = %self.dependency, "trial call failed, circuit re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
            }
            BreakerState::Closed => {
                let in_window = inner
                    .window_start
                    .map(|start| now.duration_since(start) <= self.config.failure_window)
                    .unwrap_or(false);
                if in_window {
                    inner.consecutive_failures += 1;
                } else {
                    inner.window_start = Some(now);
                    inner.consecutive_failures = 1;
                }

                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        dependency = %self.dependency,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
        }
    }

    fn open_error(&self) -> CircuitOpen {
        CircuitOpen {
            dependency: self.dependency.clone(),
        }
    }
}

/// Admission for one call through a [`CircuitBreaker`]
#[must_use = "settle the permit with success() or failure()"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit is the single half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// Breakers shared per external dependency, across all requests
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get or lazily create the breaker for `dependency`
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config.clone())))
            .clone()
    }

    /// Snapshot of every known breaker, for health reporting
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
