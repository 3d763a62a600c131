//! The template-testing pipeline.
//!
//! ```text
//! parameters ─▶ sandbox ─▶ timeout guard ─▶ circuit breaker ─▶ registry ─▶ engine.render
//! ```
//!
//! Each stage converts its failures into a value, so callers always get a
//! [`TestResult`] back.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use promptlab_core::config::PipelineConfig;
use promptlab_core::{
    DiscoveredParameters, Metadata, Parameters, PromptId, PromptSource, PromptTemplate,
    RenderResult, TemplateError, TestContext, TestData, TestResult,
};
use promptlab_guard::{CircuitBreaker, CircuitState, ParameterSandbox, SanitizedSet, TimeoutGuard};
use promptlab_renderer::{extractor, EngineRegistry};

/// Breaker name used in log events.
const RENDER_BREAKER: &str = "render";

pub struct TestingService {
    registry: Arc<EngineRegistry>,
    breaker: Arc<CircuitBreaker>,
    guard: TimeoutGuard,
    sandbox: ParameterSandbox,
    prompts: Option<Arc<dyn PromptSource>>,
}

impl Default for TestingService {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl TestingService {
    /// Build every stage from `config`, with Tera and the fallback registered.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            registry: Arc::new(EngineRegistry::with_defaults(&config.engine)),
            breaker: Arc::new(CircuitBreaker::from_config(RENDER_BREAKER, &config.breaker)),
            guard: TimeoutGuard::from_config(&config.timeout),
            sandbox: ParameterSandbox::new(config.sandbox.clone()),
            prompts: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_timeout_guard(mut self, guard: TimeoutGuard) -> Self {
        self.guard = guard;
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: ParameterSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    #[must_use]
    pub fn with_prompt_source(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Run one template through the full pipeline.
    pub fn execute_test(&self, context: &TestContext) -> TestResult {
        let template = context.template();
        let SanitizedSet { parameters: sanitized, validation } =
            self.sandbox.sanitize(context.parameters());

        let mut metadata = Metadata::new();
        metadata.insert("parameter_count".into(), context.parameters().len().into());
        metadata.insert("sanitized_parameter_count".into(), sanitized.len().into());
        metadata.insert("sanitizer_warnings".into(), Value::from(validation.warnings().to_vec()));
        metadata.insert("sanitizer_warning_count".into(), validation.warnings().len().into());

        if !validation.is_valid() {
            tracing::debug!(errors = validation.errors().len(), "parameters rejected by sandbox");
            metadata.insert("sanitizer_errors".into(), Value::from(validation.errors().to_vec()));
            metadata.insert("circuit_state".into(), self.breaker.state().to_string().into());
            let error = TemplateError::validation(validation.errors().join("; "));
            return TestResult::failed(template, error, metadata);
        }

        let parameters: Parameters =
            sanitized.into_iter().map(|(name, value)| (name, Value::String(value))).collect();

        let registry = Arc::clone(&self.registry);
        let breaker = Arc::clone(&self.breaker);
        let preferred = context.engine().to_string();
        let body = template.to_string();
        let deadline = self.guard.effective_timeout(context.timeout_ms());
        let execution = self.guard.execute(
            move || {
                breaker.execute(|| {
                    let engine = registry.preferred_engine(&preferred);
                    let started = Instant::now();
                    let rendered = engine.render_encoded(&body, &parameters);
                    let elapsed = started.elapsed();
                    if elapsed > deadline {
                        // Counted here because the guard may already have stopped waiting.
                        return Err(TemplateError::Timeout {
                            elapsed_ms: millis(elapsed),
                            timeout_ms: millis(deadline),
                        });
                    }
                    if let Some(err) = rendered.error().filter(|e| counts_against_breaker(e)) {
                        return Err(err.clone());
                    }
                    Ok(mark_substitution(&registry, &preferred, engine.name(), rendered))
                })
            },
            context.timeout_ms(),
        );

        let (success, rendered, execution_metadata, error) = execution.into_parts();
        metadata.extend(execution_metadata);
        metadata.insert("circuit_state".into(), self.breaker.state().to_string().into());

        if !success {
            let error = error.unwrap_or_else(|| TemplateError::contract("failed execution carried no error"));
            tracing::info!(kind = error.kind(), error = %error, "template test failed");
            return TestResult::failed(template, error, metadata);
        }
        match rendered {
            Some(rendered) => Self::finish(template, rendered, metadata),
            None => TestResult::failed(
                template,
                TemplateError::contract("successful execution carried no render result"),
                metadata,
            ),
        }
    }

    fn finish(template: &str, rendered: RenderResult, mut metadata: Metadata) -> TestResult {
        let content_length = rendered.content_length();
        let (success, content, render_metadata, error) = rendered.into_parts();
        metadata.extend(render_metadata);
        metadata.insert("content_length".into(), content_length.into());
        metadata.entry("degraded".to_string()).or_insert(Value::Bool(false));
        if success {
            return TestResult::ok(content, metadata);
        }
        let error = error.unwrap_or_else(|| TemplateError::render("render failed without an error"));
        tracing::info!(kind = error.kind(), error = %error, "template did not render");
        TestResult::failed(template, error, metadata)
    }

    /// Test a stored prompt, or `custom_template` in its place.
    pub fn execute_prompt_test(
        &self,
        prompt_id: &PromptId,
        version: Option<u32>,
        parameters: Parameters,
        custom_template: Option<&str>,
    ) -> TestResult {
        let context = TestContext::new(String::new()).with_parameters(parameters);
        self.execute_prompt_test_with(prompt_id, version, custom_template, context)
    }

    /// Like [`execute_prompt_test`](Self::execute_prompt_test), taking
    /// parameters, timeout and preferred engine from `context`. The
    /// context's own template is replaced by the resolved one.
    pub fn execute_prompt_test_with(
        &self,
        prompt_id: &PromptId,
        version: Option<u32>,
        custom_template: Option<&str>,
        context: TestContext,
    ) -> TestResult {
        let resolved = match self.resolve_template(prompt_id, version, custom_template) {
            Ok(resolved) => resolved,
            Err(error) => {
                let metadata = Metadata::from([("prompt_id".to_string(), Value::from(prompt_id.0.as_str()))]);
                return TestResult::failed(String::new(), error, metadata);
            }
        };
        let context = context.with_template(resolved.body.clone());
        let mut result = self.execute_test(&context);
        result.metadata.extend(prompt_metadata(prompt_id, &resolved, custom_template.is_some()));
        result
    }

    /// The body to test: `custom_template` when given, otherwise the stored
    /// prompt at `version` (or its active version).
    pub fn resolve_template(
        &self,
        prompt_id: &PromptId,
        version: Option<u32>,
        custom_template: Option<&str>,
    ) -> Result<PromptTemplate, TemplateError> {
        let stored = self.fetch(prompt_id, version)?;
        Ok(match custom_template {
            Some(body) => PromptTemplate { body: body.to_string(), ..stored },
            None => stored,
        })
    }

    /// Template body, discovered parameters and provenance for a stored prompt.
    pub fn get_test_data(&self, prompt_id: &PromptId, version: Option<u32>) -> Result<TestData, TemplateError> {
        let template = self.fetch(prompt_id, version)?;
        Ok(TestData {
            discovered_parameters: self.extract_parameters(&template.body),
            template: template.body,
            prompt_name: template.prompt_name,
            change_note: template.change_note,
        })
    }

    /// Ask the best engine to parse `template`; if it fails or panics, use
    /// the regex extractor instead. Always returns a map.
    pub fn extract_parameters(&self, template: &str) -> DiscoveredParameters {
        let engine = self.registry.best_available_engine();
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| engine.parse_template(template)));
        match parsed {
            Ok(parsed) if parsed.success() => parsed.into_parameters(),
            Ok(parsed) => {
                tracing::debug!(
                    engine = engine.name(),
                    error = ?parsed.error(),
                    "engine parse failed, using regex extractor"
                );
                extractor::extract_parameters(template)
            }
            Err(_) => {
                tracing::warn!(engine = engine.name(), "engine parse panicked, using regex extractor");
                extractor::extract_parameters(template)
            }
        }
    }

    /// Best-effort render: the rendered text, or `template` unchanged on any failure.
    pub fn render_template(&self, template: &str, parameters: Parameters) -> String {
        let result = self.execute_test(&TestContext::new(template).with_parameters(parameters));
        if result.success {
            result.content
        } else {
            template.to_string()
        }
    }

    fn fetch(&self, prompt_id: &PromptId, version: Option<u32>) -> Result<PromptTemplate, TemplateError> {
        let source = self
            .prompts
            .as_ref()
            .ok_or_else(|| TemplateError::not_found("prompt", prompt_id.0.as_str()))?;
        source.fetch_template(prompt_id, version)
    }
}

/// Caller mistakes (bad syntax, missing variables) say nothing about the
/// health of the render path, so only engine faults and overruns are counted.
fn counts_against_breaker(err: &TemplateError) -> bool {
    matches!(err, TemplateError::Contract { .. } | TemplateError::Timeout { .. })
}

/// Stamp `degraded` when the preferred engine is registered but another one
/// rendered in its place.
fn mark_substitution(
    registry: &EngineRegistry,
    preferred: &str,
    used: &str,
    rendered: RenderResult,
) -> RenderResult {
    if preferred == used || !registry.has_engine(preferred) {
        return rendered;
    }
    tracing::warn!(wanted = %preferred, used = %used, "rendered with a substitute engine");
    rendered.with_metadata(Metadata::from([
        ("degraded".to_string(), Value::Bool(true)),
        ("requested_engine".to_string(), Value::from(preferred)),
    ]))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn prompt_metadata(prompt_id: &PromptId, template: &PromptTemplate, custom: bool) -> Metadata {
    let mut metadata = Metadata::from([
        ("prompt_id".to_string(), Value::from(prompt_id.0.as_str())),
        ("prompt_name".to_string(), Value::from(template.prompt_name.as_str())),
        ("prompt_version".to_string(), Value::from(template.version)),
        ("custom_template".to_string(), Value::Bool(custom)),
    ]);
    if let Some(note) = &template.change_note {
        metadata.insert("change_note".to_string(), Value::from(note.as_str()));
    }
    metadata
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use promptlab_core::InMemoryPromptStore;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        serde_json::from_value(value).expect("object")
    }

    fn service_with_store() -> (TestingService, Arc<InMemoryPromptStore>) {
        let store = Arc::new(InMemoryPromptStore::new());
        let service = TestingService::default().with_prompt_source(store.clone());
        (service, store)
    }

    #[test]
    fn metadata_carries_every_layer() {
        let service = TestingService::default();
        let result = service.execute_test(
            &TestContext::new("Hi {{ name }}").with_parameters(params(json!({"name": "Ann"}))),
        );
        assert!(result.success, "{:?}", result.error);
        for key in [
            "engine",
            "engine_version",
            "degraded",
            "content_length",
            "execution_time_ms",
            "timeout_ms",
            "circuit_state",
            "parameter_count",
            "sanitized_parameter_count",
            "sanitizer_warnings",
            "sanitizer_warning_count",
        ] {
            assert!(result.metadata.contains_key(key), "missing {key}");
        }
        assert_eq!(result.metadata["content_length"], 6);
        assert_eq!(result.metadata["circuit_state"], "closed");
        assert_eq!(result.metadata["degraded"], false);
    }

    #[test]
    fn render_failure_returns_original_template() {
        let service = TestingService::default();
        let result = service.execute_test(&TestContext::new("Hi {{ missing }}"));
        assert!(!result.success);
        assert_eq!(result.content, "Hi {{ missing }}");
        assert_eq!(result.error.as_ref().map(TemplateError::kind), Some("render"));
    }

    #[test]
    fn render_template_is_best_effort() {
        let service = TestingService::default();
        assert_eq!(service.render_template("A{{ x }}", params(json!({"x": 1}))), "A1");
        assert_eq!(service.render_template("{% if %}", Parameters::new()), "{% if %}");
    }

    #[test]
    fn extraction_uses_engine_when_it_parses() {
        let service = TestingService::default();
        let found = service.extract_parameters("{{ user.name }} {{ title }}");
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["title", "user"]);
    }

    #[test]
    fn extraction_falls_back_to_regex_on_parse_failure() {
        let service = TestingService::default();
        let found = service.extract_parameters("{{ name }} {% if flag %}");
        assert!(found.contains_key("name"));
        assert!(found.contains_key("flag"));
    }

    #[test]
    fn test_data_for_stored_prompt() {
        let (service, store) = service_with_store();
        store.create("greet", "Greeting", "Hello {{ name }}");
        store
            .add_version(&PromptId::from("greet"), "Hey {{ name }} {{ mood }}", Some("casual".into()))
            .expect("revise");

        let data = service.get_test_data(&PromptId::from("greet"), None).expect("data");
        assert_eq!(data.template, "Hey {{ name }} {{ mood }}");
        assert_eq!(data.prompt_name, "Greeting");
        assert_eq!(data.change_note.as_deref(), Some("casual"));
        assert_eq!(data.discovered_parameters.len(), 2);

        let first = service.get_test_data(&PromptId::from("greet"), Some(1)).expect("v1");
        assert_eq!(first.template, "Hello {{ name }}");
    }

    #[test]
    fn unknown_prompt_is_not_found() {
        let (service, _store) = service_with_store();
        let err = service.get_test_data(&PromptId::from("ghost"), None).unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let result = service.execute_prompt_test(&PromptId::from("ghost"), None, Parameters::new(), None);
        assert!(!result.success);
        assert_eq!(result.metadata["prompt_id"], "ghost");
    }

    #[test]
    fn prompt_test_uses_stored_or_custom_template() {
        let (service, store) = service_with_store();
        store.create("greet", "Greeting", "Hello {{ name }}");
        let id = PromptId::from("greet");

        let stored = service.execute_prompt_test(&id, None, params(json!({"name": "Bo"})), None);
        assert_eq!(stored.content, "Hello Bo");
        assert_eq!(stored.metadata["prompt_version"], 1);
        assert_eq!(stored.metadata["custom_template"], false);

        let custom =
            service.execute_prompt_test(&id, None, params(json!({"name": "Bo"})), Some("Bye {{ name }}"));
        assert_eq!(custom.content, "Bye Bo");
        assert_eq!(custom.metadata["prompt_name"], "Greeting");
        assert_eq!(custom.metadata["custom_template"], true);
    }

    #[test]
    fn custom_template_does_not_hide_unknown_prompt() {
        let (service, store) = service_with_store();
        let result = service.execute_prompt_test(
            &PromptId::from("ghost"),
            None,
            Parameters::new(),
            Some("Hi {{ name }}"),
        );
        assert!(!result.success);
        assert_eq!(result.error.as_ref().map(TemplateError::kind), Some("not_found"));

        store.create("greet", "Greeting", "Hello");
        let err = service
            .resolve_template(&PromptId::from("greet"), Some(9), Some("x"))
            .unwrap_err();
        assert_eq!(err, TemplateError::not_found("prompt version", "greet@9"));
    }

    #[test]
    fn caller_mistakes_do_not_open_the_circuit() {
        let service = TestingService::default();
        for _ in 0..10 {
            let typo = service.execute_test(&TestContext::new("Hi {{ typo }}"));
            assert_eq!(typo.error.as_ref().map(TemplateError::kind), Some("render"));
            let syntax = service.execute_test(&TestContext::new("Hi {% if %}"));
            assert_eq!(syntax.error.as_ref().map(TemplateError::kind), Some("parse"));
        }
        assert_eq!(service.circuit_state(), CircuitState::Closed);

        let other_caller = service.execute_test(
            &TestContext::new("Hi {{ name }}").with_parameters(params(json!({"name": "x"}))),
        );
        assert!(other_caller.success, "{:?}", other_caller.error);
        assert_eq!(other_caller.content, "Hi x");
    }

    #[test]
    fn without_prompt_source_lookups_are_not_found() {
        let service = TestingService::default();
        let err = service.get_test_data(&PromptId::from("any"), None).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
