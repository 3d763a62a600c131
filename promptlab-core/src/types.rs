//! Value types for the template-testing pipeline.
//!
//! Every result type here is created at the start of one render/test request
//! and dropped at the end of it. Fields are private where the type carries an
//! invariant; constructors are the only way to build them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TemplateError;

/// Free-form metadata attached to results. Ordered for deterministic output.
pub type Metadata = BTreeMap<String, Value>;

/// Untrusted caller-supplied parameters.
pub type Parameters = BTreeMap<String, Value>;

/// Parameters after the sandbox has coerced every value to a string.
pub type SanitizedParameters = BTreeMap<String, String>;

/// Engine name used when a [`TestContext`] does not name one.
pub const DEFAULT_ENGINE: &str = "tera";

/// Timeout applied when a [`TestContext`] does not set one.
pub const DEFAULT_TIMEOUT_MS: i64 = 5000;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a stored prompt.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromptId(pub String);

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PromptId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PromptId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Discovered parameters
// ---------------------------------------------------------------------------

/// How a template appears to use a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    String,
    Boolean,
    Iterable,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::String => write!(f, "string"),
            ParameterKind::Boolean => write!(f, "boolean"),
            ParameterKind::Iterable => write!(f, "iterable"),
        }
    }
}

/// A placeholder discovered inside a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ParameterInfo {
    pub fn required(kind: ParameterKind) -> Self {
        Self { kind, required: true, default: None }
    }

    pub fn optional(kind: ParameterKind, default: Option<String>) -> Self {
        Self { kind, required: false, default }
    }
}

/// Discovered parameters keyed by root identifier.
pub type DiscoveredParameters = BTreeMap<String, ParameterInfo>;

// ---------------------------------------------------------------------------
// ParseResult
// ---------------------------------------------------------------------------

/// Outcome of asking an engine to parse a template.
///
/// A failed parse never carries parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseResult {
    success: bool,
    parameters: DiscoveredParameters,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<TemplateError>,
}

impl ParseResult {
    pub fn ok(parameters: DiscoveredParameters, warnings: Vec<String>) -> Self {
        Self { success: true, parameters, warnings, error: None }
    }

    pub fn failed(error: TemplateError, warnings: Vec<String>) -> Self {
        Self { success: false, parameters: DiscoveredParameters::new(), warnings, error: Some(error) }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn parameters(&self) -> &DiscoveredParameters {
        &self.parameters
    }

    pub fn into_parameters(self) -> DiscoveredParameters {
        self.parameters
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn error(&self) -> Option<&TemplateError> {
        self.error.as_ref()
    }
}

// ---------------------------------------------------------------------------
// RenderResult
// ---------------------------------------------------------------------------

/// Outcome of rendering a template. On failure `content` holds whatever the
/// engine could salvage, usually the original template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderResult {
    success: bool,
    content: String,
    metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<TemplateError>,
}

impl RenderResult {
    pub fn ok(content: impl Into<String>, metadata: Metadata) -> Self {
        Self { success: true, content: content.into(), metadata, error: None }
    }

    pub fn failed(content: impl Into<String>, error: TemplateError, metadata: Metadata) -> Self {
        Self { success: false, content: content.into(), metadata, error: Some(error) }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Length in characters; defined for failed results too.
    pub fn content_length(&self) -> usize {
        self.content.chars().count()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn error(&self) -> Option<&TemplateError> {
        self.error.as_ref()
    }

    /// Returns a copy with extra metadata entries merged over the existing ones.
    #[must_use]
    pub fn with_metadata(mut self, extra: Metadata) -> Self {
        self.metadata.extend(extra);
        self
    }

    pub fn into_parts(self) -> (bool, String, Metadata, Option<TemplateError>) {
        (self.success, self.content, self.metadata, self.error)
    }
}

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// Outcome of a validation pass.
///
/// `valid` is decided by the producer; [`has_errors`](Self::has_errors) only
/// looks at the error list.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationResult {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    metadata: Metadata,
}

impl ValidationResult {
    pub fn new(valid: bool, errors: Vec<String>, warnings: Vec<String>, metadata: Metadata) -> Self {
        Self { valid, errors, warnings, metadata }
    }

    /// Valid exactly when `errors` is empty.
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self { valid: errors.is_empty(), errors, warnings, metadata: Metadata::new() }
    }

    pub fn valid() -> Self {
        Self { valid: true, ..Default::default() }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self { valid: false, errors: vec![error.into()], ..Default::default() }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Envelope produced by the timeout guard around an arbitrary operation.
///
/// `metadata` always contains `execution_time_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult<T> {
    success: bool,
    content: Option<T>,
    metadata: Metadata,
    error: Option<TemplateError>,
}

impl<T> ExecutionResult<T> {
    pub fn succeeded(content: T, execution_time_ms: u64, mut metadata: Metadata) -> Self {
        metadata.insert("execution_time_ms".into(), execution_time_ms.into());
        Self { success: true, content: Some(content), metadata, error: None }
    }

    pub fn failed(error: TemplateError, execution_time_ms: u64, mut metadata: Metadata) -> Self {
        metadata.insert("execution_time_ms".into(), execution_time_ms.into());
        Self { success: false, content: None, metadata, error: Some(error) }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn content(&self) -> Option<&T> {
        self.content.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn error(&self) -> Option<&TemplateError> {
        self.error.as_ref()
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.metadata
            .get("execution_time_ms")
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }

    pub fn into_parts(self) -> (bool, Option<T>, Metadata, Option<TemplateError>) {
        (self.success, self.content, self.metadata, self.error)
    }
}

// ---------------------------------------------------------------------------
// TestContext
// ---------------------------------------------------------------------------

/// Input bundle for one test invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TestContext {
    template: String,
    parameters: Parameters,
    timeout_ms: i64,
    engine: String,
}

impl TestContext {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            parameters: Parameters::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            engine: DEFAULT_ENGINE.to_string(),
        }
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Values `<= 0` make the timeout guard use its configured default.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }
}

// ---------------------------------------------------------------------------
// TestResult / TestData
// ---------------------------------------------------------------------------

/// The structured response every test invocation produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub success: bool,
    pub content: String,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TemplateError>,
}

impl TestResult {
    pub fn ok(content: impl Into<String>, metadata: Metadata) -> Self {
        Self { success: true, content: content.into(), metadata, error: None }
    }

    pub fn failed(content: impl Into<String>, error: TemplateError, metadata: Metadata) -> Self {
        Self { success: false, content: content.into(), metadata, error: Some(error) }
    }
}

/// Everything a caller needs to present a test form for a stored prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestData {
    pub template: String,
    pub discovered_parameters: DiscoveredParameters,
    pub prompt_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_note: Option<String>,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// A resolved template body as returned by a prompt lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptTemplate {
    pub body: String,
    pub prompt_name: String,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_note: Option<String>,
}

/// One immutable revision of a prompt's template body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub number: u32,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored prompt with its full version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub name: String,
    pub active_version: u32,
    #[serde(default)]
    pub versions: Vec<PromptVersion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prompt {
    /// `None` resolves to the active version.
    pub fn version(&self, number: Option<u32>) -> Option<&PromptVersion> {
        let wanted = number.unwrap_or(self.active_version);
        self.versions.iter().find(|v| v.number == wanted)
    }

    pub fn latest_version_number(&self) -> u32 {
        self.versions.iter().map(|v| v.number).max().unwrap_or(0)
    }

    pub fn to_template(&self, version: &PromptVersion) -> PromptTemplate {
        PromptTemplate {
            body: version.body.clone(),
            prompt_name: self.name.clone(),
            version: version.number,
            change_note: version.change_note.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
