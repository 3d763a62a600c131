//! Last-resort engine: literal `{{name}}` substitution and nothing else.
//!
//! Always available, and every path returns a result. If anything goes
//! wrong internally the original template is handed back unchanged.

use std::panic::{self, AssertUnwindSafe};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use promptlab_core::{
    DiscoveredParameters, Metadata, ParameterInfo, ParameterKind, Parameters, ParseResult,
    RenderResult, TemplateError, ValidationResult,
};

use crate::engine::{value_to_text, TemplateEngine};

pub const FALLBACK_ENGINE_NAME: &str = "fallback";
const FALLBACK_VERSION: &str = "1.0";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex must compile")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackEngine;

impl FallbackEngine {
    pub fn new() -> Self {
        Self
    }

    fn substitute(template: &str, parameters: &Parameters) -> (String, Vec<String>) {
        let mut unresolved = Vec::new();
        let content = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match parameters.get(name) {
                Some(value) => value_to_text(value),
                None => {
                    if !unresolved.iter().any(|n| n == name) {
                        unresolved.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });
        (content.into_owned(), unresolved)
    }

    fn metadata() -> Metadata {
        Metadata::from([
            ("engine".to_string(), Value::from(FALLBACK_ENGINE_NAME)),
            ("engine_version".to_string(), Value::from(FALLBACK_VERSION)),
        ])
    }
}

impl TemplateEngine for FallbackEngine {
    fn name(&self) -> &str {
        FALLBACK_ENGINE_NAME
    }

    fn version(&self) -> &str {
        FALLBACK_VERSION
    }

    fn parse_template(&self, template: &str) -> ParseResult {
        let mut parameters = DiscoveredParameters::new();
        for caps in PLACEHOLDER.captures_iter(template) {
            parameters
                .entry(caps[1].to_string())
                .or_insert_with(|| ParameterInfo::required(ParameterKind::String));
        }
        let mut warnings = Vec::new();
        if template.contains("{%") {
            warnings.push("block tags are not supported and will be rendered verbatim".to_string());
        }
        ParseResult::ok(parameters, warnings)
    }

    fn render(&self, template: &str, parameters: &Parameters) -> RenderResult {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| Self::substitute(template, parameters)));
        let mut metadata = Self::metadata();
        match outcome {
            Ok((content, unresolved)) => {
                if !unresolved.is_empty() {
                    metadata.insert(
                        "unresolved_placeholders".to_string(),
                        Value::from(unresolved),
                    );
                }
                RenderResult::ok(content, metadata)
            }
            Err(_) => RenderResult::failed(
                template,
                TemplateError::render("fallback substitution failed"),
                metadata,
            ),
        }
    }

    fn validate_template(&self, template: &str) -> ValidationResult {
        let opens = template.matches("{{").count();
        let closes = template.matches("}}").count();
        let result = if opens == closes {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(format!(
                "unbalanced placeholder braces: {opens} opening, {closes} closing"
            ))
        };
        result.with_metadata("engine", FALLBACK_ENGINE_NAME)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supported_features(&self) -> Vec<String> {
        vec!["variables".to_string()]
    }

    fn configuration(&self) -> Metadata {
        Metadata::from([("substitution".to_string(), Value::from("literal"))])
    }
}
