//! # promptlab-guard
//!
//! Failure-isolation layers that sit between untrusted callers and the
//! template engines:
//!
//! - [`sandbox`] — [`ParameterSandbox`] cleans hostile parameter maps
//! - [`timeout`] — [`TimeoutGuard`] bounds execution latency
//! - [`breaker`] — [`CircuitBreaker`] stops repeated-failure cascades

pub mod breaker;
pub mod sandbox;
pub mod timeout;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use sandbox::{ParameterSandbox, SanitizedSet};
pub use timeout::TimeoutGuard;
