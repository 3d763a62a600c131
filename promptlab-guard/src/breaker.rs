//! Circuit breaker around the render path.
//!
//! ```text
//!   CLOSED ──(threshold consecutive failures)──▶ OPEN
//!     ▲                                           │
//!     │ trial ok                 recovery elapsed │
//!     │                                           ▼
//!     └──────────────────────────────────── HALF_OPEN ──(trial fails)──▶ OPEN
//! ```
//!
//! One instance is shared by every concurrent request. State lives behind a
//! mutex that is never held while the wrapped operation runs; every counter
//! update happens under it, so failures are counted exactly once.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use promptlab_core::config::BreakerConfig;
use promptlab_core::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of the breaker, used for result metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial: Option<Trial>,
    next_trial_id: u64,
}

/// The single half-open trial call currently admitted.
#[derive(Debug, Clone, Copy)]
struct Trial {
    id: u64,
    started: Instant,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            trial: None,
            next_trial_id: 0,
        }
    }

    /// Back to `CLOSED`. Trial ids keep counting so a stale trial never
    /// matches a later one.
    fn close(&mut self) {
        *self = Self { next_trial_id: self.next_trial_id, ..Self::closed() };
    }

    fn start_trial(&mut self) -> u64 {
        self.next_trial_id = self.next_trial_id.wrapping_add(1);
        self.trial = Some(Trial { id: self.next_trial_id, started: Instant::now() });
        self.next_trial_id
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// A threshold of zero is treated as one.
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(name, config.failure_threshold, Duration::from_secs(config.recovery_timeout_secs))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
        }
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// An `Err` from the operation counts as a failure; a rejection does not.
    /// A half-open trial gets one recovery window to finish. After that it is
    /// counted as failed, and whatever it returns later is ignored.
    pub fn execute<T, F>(&self, operation: F) -> Result<T, TemplateError>
    where
        F: FnOnce() -> Result<T, TemplateError>,
    {
        let mut permit = self.acquire()?;
        let outcome = operation();
        match &outcome {
            Ok(_) => self.on_success(permit.trial),
            Err(err) => self.on_failure(err, permit.trial),
        }
        permit.settled = true;
        outcome
    }

    /// Force the breaker back to `CLOSED` with counters zeroed.
    pub fn reset(&self) {
        self.lock().close();
        tracing::info!(breaker = %self.name, "circuit manually reset");
    }

    fn acquire(&self) -> Result<Permit<'_>, TemplateError> {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            if let Some(trial) = inner.trial {
                let running = trial.started.elapsed();
                if running < self.recovery_timeout {
                    return Err(TemplateError::CircuitOpen {
                        retry_after_ms: millis(self.recovery_timeout - running),
                    });
                }
                // The trial outlived its window: it failed at its deadline.
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure = Some(trial.started + self.recovery_timeout);
                inner.state = CircuitState::Open;
                inner.trial = None;
                tracing::warn!(
                    breaker = %self.name,
                    running_ms = millis(running),
                    "trial did not finish within the recovery window, circuit re-opened"
                );
            }
        }

        let trial = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let since = inner.last_failure.map(|t| t.elapsed()).unwrap_or(self.recovery_timeout);
                if since < self.recovery_timeout {
                    return Err(TemplateError::CircuitOpen {
                        retry_after_ms: millis(self.recovery_timeout - since),
                    });
                }
                inner.state = CircuitState::HalfOpen;
                tracing::info!(breaker = %self.name, "circuit half-open, allowing trial");
                Some(inner.start_trial())
            }
            CircuitState::HalfOpen => Some(inner.start_trial()),
        };
        Ok(Permit { breaker: self, trial, settled: false })
    }

    /// A trial outcome only counts while that trial is still the current one.
    fn is_stale(&self, inner: &BreakerState, trial: Option<u64>) -> bool {
        let stale = trial.is_some() && inner.trial.map(|p| p.id) != trial;
        if stale {
            tracing::debug!(breaker = %self.name, "ignoring outcome of an expired trial");
        }
        stale
    }

    fn on_success(&self, trial: Option<u64>) {
        let mut inner = self.lock();
        if self.is_stale(&inner, trial) {
            return;
        }
        match inner.state {
            CircuitState::HalfOpen if trial.is_some() => {
                inner.close();
                tracing::info!(breaker = %self.name, "trial succeeded, circuit closed");
            }
            CircuitState::Closed => inner.failure_count = 0,
            // Another caller changed the state while this one was running.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, err: &TemplateError, trial: Option<u64>) {
        let mut inner = self.lock();
        if self.is_stale(&inner, trial) {
            return;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    error = %err,
                    "failure threshold reached, circuit opened"
                );
            }
            CircuitState::HalfOpen if trial.is_some() => {
                inner.state = CircuitState::Open;
                inner.trial = None;
                tracing::warn!(breaker = %self.name, error = %err, "trial failed, circuit re-opened");
            }
            _ => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission ticket. Dropping it unsettled (the operation panicked) counts
/// as a failure so a half-open trial cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(&TemplateError::contract("operation panicked"), self.trial);
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;

    fn fail() -> Result<(), TemplateError> {
        Err(TemplateError::render("boom"))
    }

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new("render", threshold, recovery)
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = cb.execute(fail);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 3);
    }

    #[test]
    fn success_resets_counter() {
        let cb = breaker(3, Duration::from_secs(60));
        let _ = cb.execute(fail);
        let _ = cb.execute(fail);
        cb.execute(|| Ok::<_, TemplateError>(())).expect("success");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn open_rejects_without_invoking() {
        let cb = breaker(1, Duration::from_secs(60));
        let _ = cb.execute(fail);

        let invoked = Cell::new(false);
        let err = cb
            .execute(|| {
                invoked.set(true);
                Ok::<_, TemplateError>(())
            })
            .unwrap_err();
        assert!(!invoked.get());
        assert!(matches!(err, TemplateError::CircuitOpen { retry_after_ms } if retry_after_ms > 0));
        assert_eq!(cb.failure_count(), 1, "rejections are not failures");
    }

    #[test]
    fn recovery_allows_single_trial() {
        let cb = breaker(1, Duration::from_millis(200));
        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(250));

        let calls = Cell::new(0);
        cb.execute(|| {
            calls.set(calls.get() + 1);
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            // A second caller during the trial is turned away.
            let nested = cb.execute(|| Ok::<_, TemplateError>(()));
            assert!(matches!(nested, Err(TemplateError::CircuitOpen { .. })));
            Ok::<_, TemplateError>(())
        })
        .expect("trial");
        assert_eq!(calls.get(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn failed_trial_reopens_and_keeps_count() {
        let cb = breaker(2, Duration::ZERO);
        let _ = cb.execute(fail);
        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Open);

        let _ = cb.execute(fail);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 3);
    }

    #[test]
    fn panicking_trial_counts_as_failure() {
        let cb = breaker(1, Duration::ZERO);
        let _ = cb.execute(fail);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cb.execute(|| -> Result<(), TemplateError> { panic!("engine bug") })
        }));
        assert!(outcome.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        // Not wedged: the next call after recovery is admitted as a trial.
        cb.execute(|| Ok::<_, TemplateError>(())).expect("trial");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn trial_that_overruns_its_window_reopens_then_recovers() {
        let cb = breaker(1, Duration::from_millis(40));
        let _ = cb.execute(fail);
        std::thread::sleep(Duration::from_millis(60));

        cb.execute(|| {
            assert_eq!(cb.state(), CircuitState::HalfOpen);
            // Still inside the window: other callers wait.
            assert!(matches!(
                cb.execute(|| Ok::<_, TemplateError>(())),
                Err(TemplateError::CircuitOpen { .. })
            ));
            std::thread::sleep(Duration::from_millis(100));
            // Past it: the stuck trial is written off and a fresh one admitted.
            cb.execute(|| Ok::<_, TemplateError>(())).expect("fresh trial");
            assert_eq!(cb.state(), CircuitState::Closed);
            Err::<(), _>(TemplateError::contract("late failure"))
        })
        .unwrap_err();

        // The overrun trial's late failure does not disturb the recovered circuit.
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn reset_forces_closed() {
        let cb = breaker(1, Duration::from_secs(60));
        let _ = cb.execute(fail);
        cb.reset();
        assert_eq!(cb.snapshot(), BreakerSnapshot {
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold: 1,
        });
    }

    #[test]
    fn concurrent_failures_are_counted_exactly() {
        let cb = Arc::new(breaker(1000, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _ = cb.execute(fail);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(cb.failure_count(), 400);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
