//! Primary engine backed by Tera: conditionals, loops, filters, macros and
//! inheritance, with strict undefined variables and HTML autoescaping.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use promptlab_core::{
    DiscoveredParameters, Metadata, ParameterInfo, ParameterKind, Parameters, ParseResult,
    RenderResult, TemplateError, ValidationResult,
};

use crate::engine::TemplateEngine;
use crate::error::RenderError;
use crate::extractor;

pub const TERA_ENGINE_NAME: &str = "tera";
const TERA_VERSION: &str = "1";

/// Name the ad-hoc template is registered under inside a throwaway `Tera`.
const TEMPLATE_NAME: &str = "__prompt__";

/// Bare or dotted identifiers only. Literals, calls, filters and anything
/// with quotes or parentheses are left out.
static PLAIN_VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?:\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("variable regex must compile")
});

static OUTPUT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{-?\s*(.*?)\s*-?\}\}").expect("output regex must compile"));

pub struct TeraEngine {
    autoescape: bool,
    available: AtomicBool,
}

impl Default for TeraEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TeraEngine {
    pub fn new(autoescape: bool) -> Self {
        Self { autoescape, available: AtomicBool::new(true) }
    }

    /// Operator switch; an unavailable engine is skipped by the registry.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn compile(&self, template: &str) -> Result<Tera, RenderError> {
        self.compile_with(template, self.autoescape)
    }

    fn compile_with(&self, template: &str, autoescape: bool) -> Result<Tera, RenderError> {
        let mut tera = Tera::default();
        tera.autoescape_on(if autoescape { vec![TEMPLATE_NAME] } else { vec![] });
        // Parameters come from untrusted callers; templates must not read the host environment.
        tera.register_function("get_env", |_: &HashMap<String, tera::Value>| {
            Err::<tera::Value, _>(tera::Error::msg("get_env is disabled"))
        });
        tera.add_raw_template(TEMPLATE_NAME, template).map_err(RenderError::Compile)?;
        Ok(tera)
    }

    fn evaluate(&self, template: &str, parameters: &Parameters, autoescape: bool) -> Result<String, RenderError> {
        let tera = self.compile_with(template, autoescape)?;
        let mut context = Context::new();
        for (name, value) in parameters {
            context.insert(name.as_str(), value);
        }
        tera.render(TEMPLATE_NAME, &context).map_err(RenderError::Evaluate)
    }

    fn render_with(&self, template: &str, parameters: &Parameters, autoescape: bool) -> RenderResult {
        let metadata = Metadata::from([
            ("engine".to_string(), Value::from(TERA_ENGINE_NAME)),
            ("engine_version".to_string(), Value::from(TERA_VERSION)),
            ("autoescape".to_string(), Value::Bool(autoescape)),
        ]);
        match self.evaluate(template, parameters, autoescape) {
            Ok(content) => RenderResult::ok(content, metadata),
            Err(err) => {
                tracing::debug!(engine = TERA_ENGINE_NAME, error = %err, "render failed");
                RenderResult::failed(template, TemplateError::from(err), metadata)
            }
        }
    }
}

impl TemplateEngine for TeraEngine {
    fn name(&self) -> &str {
        TERA_ENGINE_NAME
    }

    fn version(&self) -> &str {
        TERA_VERSION
    }

    fn parse_template(&self, template: &str) -> ParseResult {
        if let Err(err) = self.compile(template) {
            return ParseResult::failed(err.into(), Vec::new());
        }

        let locals: BTreeSet<String> = extractor::bound_names(template);
        let mut parameters = DiscoveredParameters::new();
        let mut warnings = Vec::new();

        for caps in OUTPUT_TAG.captures_iter(template) {
            let expr = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let Some(root) = PLAIN_VARIABLE.captures(expr).and_then(|c| c.get(1)) else {
                warnings.push(format!("expression `{expr}` skipped during variable discovery"));
                continue;
            };
            let root = root.as_str();
            if locals.contains(root) || extractor::is_reserved(root) {
                continue;
            }
            parameters
                .entry(root.to_string())
                .or_insert_with(|| ParameterInfo::required(ParameterKind::String));
        }

        ParseResult::ok(parameters, warnings)
    }

    fn render(&self, template: &str, parameters: &Parameters) -> RenderResult {
        self.render_with(template, parameters, self.autoescape)
    }

    /// Values arrive encoded, so autoescape is skipped for this render.
    fn render_encoded(&self, template: &str, parameters: &Parameters) -> RenderResult {
        self.render_with(template, parameters, false)
    }

    fn validate_template(&self, template: &str) -> ValidationResult {
        match self.compile(template) {
            Ok(_) => ValidationResult::valid(),
            Err(err) => ValidationResult::invalid(err.to_string()),
        }
        .with_metadata("engine", TERA_ENGINE_NAME)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn supported_features(&self) -> Vec<String> {
        [
            "variables",
            "conditionals",
            "loops",
            "filters",
            "macros",
            "inheritance",
            "autoescape",
            "strict_undefined",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn configuration(&self) -> Metadata {
        Metadata::from([
            ("autoescape".to_string(), Value::Bool(self.autoescape)),
            ("strict_undefined".to_string(), Value::Bool(true)),
            ("available".to_string(), Value::Bool(self.is_available())),
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
