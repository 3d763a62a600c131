//! Template-testing orchestrator shared by the CLI and any embedding host.
//!
//! [`TestingService`] composes the sandbox, timeout guard, circuit breaker
//! and engine registry into the operations callers use: `execute_test`,
//! `execute_prompt_test`, `get_test_data`, `extract_parameters` and
//! `render_template`.

pub mod service;

pub use service::TestingService;
