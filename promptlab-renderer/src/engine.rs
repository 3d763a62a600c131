//! The capability set every template engine exposes, and the adapter the
//! registry hands out when it has to degrade to the fallback engine.

use std::sync::Arc;

use serde_json::Value;

use promptlab_core::{Metadata, Parameters, ParseResult, RenderResult, ValidationResult};

/// A pluggable strategy for parsing, validating and rendering one template syntax.
///
/// Implementations convert every failure into a result value; nothing here
/// returns `Err` or is expected to panic.
pub trait TemplateEngine: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Check syntax and discover the parameters the template uses.
    fn parse_template(&self, template: &str) -> ParseResult;

    /// Render `template` with `parameters`. On failure the result's content is
    /// the original template.
    fn render(&self, template: &str, parameters: &Parameters) -> RenderResult;

    /// Render parameters whose values are already HTML-encoded, such as
    /// sandbox output. Engines that escape on their own must not escape
    /// these values a second time.
    fn render_encoded(&self, template: &str, parameters: &Parameters) -> RenderResult {
        self.render(template, parameters)
    }

    fn validate_template(&self, template: &str) -> ValidationResult;

    fn is_available(&self) -> bool;

    fn supported_features(&self) -> Vec<String>;

    fn configuration(&self) -> Metadata;
}

/// Wraps an engine that was selected because nothing better was available.
///
/// Render results are stamped with `degraded = true` so callers can tell a
/// degraded answer from a normal one.
pub struct EngineAdapter {
    inner: Arc<dyn TemplateEngine>,
}

impl EngineAdapter {
    pub fn degraded(inner: Arc<dyn TemplateEngine>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn TemplateEngine> {
        &self.inner
    }

    fn stamp(&self) -> Metadata {
        Metadata::from([
            ("degraded".to_string(), Value::Bool(true)),
            ("engine".to_string(), Value::String(self.inner.name().to_string())),
        ])
    }
}

impl TemplateEngine for EngineAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    fn parse_template(&self, template: &str) -> ParseResult {
        self.inner.parse_template(template)
    }

    fn render(&self, template: &str, parameters: &Parameters) -> RenderResult {
        self.inner.render(template, parameters).with_metadata(self.stamp())
    }

    fn render_encoded(&self, template: &str, parameters: &Parameters) -> RenderResult {
        self.inner.render_encoded(template, parameters).with_metadata(self.stamp())
    }

    fn validate_template(&self, template: &str) -> ValidationResult {
        self.inner.validate_template(template)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supported_features(&self) -> Vec<String> {
        self.inner.supported_features()
    }

    fn configuration(&self) -> Metadata {
        let mut config = self.inner.configuration();
        config.insert("degraded".to_string(), Value::Bool(true));
        config
    }
}

/// Parameter values as plain text, for engines without a value model.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
