//! Timeout guard wrapped around a shared circuit breaker, as the pipeline uses them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use promptlab_core::config::{SandboxConfig, TimeoutMode};
use promptlab_core::{Parameters, TemplateError};
use promptlab_guard::{CircuitBreaker, CircuitState, ParameterSandbox, TimeoutGuard};

fn guarded(
    guard: &TimeoutGuard,
    breaker: &Arc<CircuitBreaker>,
    outcome: Result<&'static str, TemplateError>,
) -> promptlab_core::ExecutionResult<&'static str> {
    let breaker = Arc::clone(breaker);
    guard.execute(move || breaker.execute(|| outcome), 1000)
}

#[test]
fn breaker_errors_surface_through_the_guard() {
    let guard = TimeoutGuard::new(Duration::from_millis(1000), TimeoutMode::Preemptive);
    let breaker = Arc::new(CircuitBreaker::new("render", 2, Duration::from_secs(60)));

    for _ in 0..2 {
        let result = guarded(&guard, &breaker, Err(TemplateError::render("bad")));
        assert_eq!(result.error().map(TemplateError::kind), Some("render"));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = guarded(&guard, &breaker, Ok("fine"));
    assert_eq!(rejected.error().map(TemplateError::kind), Some("circuit_open"));
    assert!(rejected.metadata().contains_key("execution_time_ms"));
}

#[test]
fn abandoned_operation_still_settles_the_breaker() {
    let guard = TimeoutGuard::new(Duration::from_millis(1000), TimeoutMode::Preemptive);
    let breaker = Arc::new(CircuitBreaker::new("render", 1, Duration::from_secs(60)));

    let slow = Arc::clone(&breaker);
    let result = guard.execute(
        move || {
            slow.execute(|| {
                thread::sleep(Duration::from_millis(150));
                Err::<(), _>(TemplateError::render("late failure"))
            })
        },
        20,
    );
    assert!(matches!(result.error(), Some(TemplateError::Timeout { .. })));

    // The worker finishes on its own and records its failure.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while breaker.state() != CircuitState::Open && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn sandbox_output_is_stable_under_resanitization() {
    let sandbox = ParameterSandbox::new(SandboxConfig::default());
    let input: Parameters = serde_json::from_value(json!({
        "name": "Robert'); DROP TABLE students;--",
        "path": "../../etc/passwd",
        "bio": "{{ 7 * 7 }} <script>x</script>",
        "tags": ["a", "{% raw %}", 3],
    }))
    .expect("object");

    let first = sandbox.sanitize(&input);
    let again: Parameters = first
        .parameters
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    let second = sandbox.sanitize(&again);

    assert_eq!(first.validation.is_valid(), second.validation.is_valid());
    for (name, value) in &first.parameters {
        assert!(!value.contains("<script"), "{name}: {value}");
        assert!(!value.contains("{{"), "{name}: {value}");
    }
}
