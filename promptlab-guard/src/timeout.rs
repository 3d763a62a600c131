//! Wall-clock bound around a single operation.
//!
//! In [`TimeoutMode::Preemptive`] the operation runs on its own worker thread
//! and the caller stops waiting at the deadline; the worker is detached and
//! whatever it eventually produces is dropped. The operation itself is not
//! interrupted, so a runaway render still burns its thread until it returns.
//!
//! In [`TimeoutMode::Advisory`] the operation runs inline and elapsed time is
//! only checked after it returns.
//!
//! Either way the caller always gets an [`ExecutionResult`]; errors and
//! panics inside the operation never escape.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use promptlab_core::config::{TimeoutConfig, TimeoutMode};
use promptlab_core::{ExecutionResult, Metadata, TemplateError};

type Outcome<T> = thread::Result<Result<T, TemplateError>>;

#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    default_timeout: Duration,
    mode: TimeoutMode,
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

impl TimeoutGuard {
    pub fn new(default_timeout: Duration, mode: TimeoutMode) -> Self {
        Self { default_timeout, mode }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(Duration::from_millis(config.default_timeout_ms), config.mode)
    }

    pub fn mode(&self) -> TimeoutMode {
        self.mode
    }

    /// `timeout_ms <= 0` selects the configured default.
    pub fn effective_timeout(&self, timeout_ms: i64) -> Duration {
        u64::try_from(timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Pre-flight check: would an operation estimated at `estimated_ms` exceed the bound?
    pub fn would_timeout(&self, estimated_ms: u64, timeout_ms: i64) -> bool {
        u128::from(estimated_ms) > self.effective_timeout(timeout_ms).as_millis()
    }

    /// Run `operation` under the bound. Never panics, never propagates.
    pub fn execute<T, F>(&self, operation: F, timeout_ms: i64) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, TemplateError> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.effective_timeout(timeout_ms);
        match self.mode {
            TimeoutMode::Advisory => self.run_inline(operation, timeout),
            TimeoutMode::Preemptive => self.run_on_worker(operation, timeout),
        }
    }

    fn run_inline<T, F>(&self, operation: F, timeout: Duration) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, TemplateError>,
    {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(operation));
        let elapsed = started.elapsed();

        if elapsed > timeout {
            tracing::warn!(
                elapsed_ms = millis(elapsed),
                timeout_ms = millis(timeout),
                "operation completed after its deadline"
            );
            return ExecutionResult::failed(
                timeout_error(elapsed, timeout),
                millis(elapsed),
                self.metadata(timeout, true),
            );
        }
        self.finish(outcome, elapsed, timeout)
    }

    fn run_on_worker<T, F>(&self, operation: F, timeout: Duration) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, TemplateError> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let (tx, rx) = mpsc::sync_channel::<Outcome<T>>(1);

        let spawned = thread::Builder::new()
            .name("promptlab-guarded".into())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(operation));
                // The receiver is gone once the caller has given up.
                let _ = tx.send(outcome);
            });

        if let Err(err) = spawned {
            let elapsed = started.elapsed();
            tracing::error!(error = %err, "failed to spawn guarded worker");
            return ExecutionResult::failed(
                TemplateError::contract(format!("failed to spawn guarded worker: {err}")),
                millis(elapsed),
                self.metadata(timeout, false),
            );
        }

        match rx.recv_timeout(timeout) {
            Ok(outcome) => self.finish(outcome, started.elapsed(), timeout),
            Err(RecvTimeoutError::Timeout) => {
                let elapsed = started.elapsed();
                tracing::warn!(
                    elapsed_ms = millis(elapsed),
                    timeout_ms = millis(timeout),
                    "abandoning operation past its deadline"
                );
                ExecutionResult::failed(
                    timeout_error(elapsed, timeout),
                    millis(elapsed),
                    self.metadata(timeout, true),
                )
            }
            Err(RecvTimeoutError::Disconnected) => ExecutionResult::failed(
                TemplateError::contract("guarded worker exited without a result"),
                millis(started.elapsed()),
                self.metadata(timeout, false),
            ),
        }
    }

    fn finish<T>(&self, outcome: Outcome<T>, elapsed: Duration, timeout: Duration) -> ExecutionResult<T> {
        let metadata = self.metadata(timeout, false);
        match outcome {
            Ok(Ok(value)) => ExecutionResult::succeeded(value, millis(elapsed), metadata),
            Ok(Err(error)) => ExecutionResult::failed(error, millis(elapsed), metadata),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "guarded operation panicked");
                ExecutionResult::failed(
                    TemplateError::contract(format!("operation panicked: {message}")),
                    millis(elapsed),
                    metadata,
                )
            }
        }
    }

    fn metadata(&self, timeout: Duration, timed_out: bool) -> Metadata {
        let mode = match self.mode {
            TimeoutMode::Preemptive => "preemptive",
            TimeoutMode::Advisory => "advisory",
        };
        Metadata::from([
            ("timeout_ms".to_string(), millis(timeout).into()),
            ("timeout_mode".to_string(), mode.into()),
            ("timed_out".to_string(), timed_out.into()),
        ])
    }
}

fn timeout_error(elapsed: Duration, timeout: Duration) -> TemplateError {
    TemplateError::Timeout { elapsed_ms: millis(elapsed), timeout_ms: millis(timeout) }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
