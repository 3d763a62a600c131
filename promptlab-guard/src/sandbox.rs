//! Parameter sandbox — every caller-supplied value is treated as hostile.
//!
//! Pipeline per top-level parameter:
//!
//! 1. Name check: `^[A-Za-z_][A-Za-z0-9_]*$`, at most `max_name_length`
//!    characters. A bad name drops that parameter and records an error.
//! 2. Type normalization: scalars become strings, arrays/objects are
//!    sanitized recursively and serialized as JSON, `null` is stringified
//!    with a warning.
//! 3. Content cleansing, repeated until stable: template markers, inline
//!    script markers, `javascript:` URIs, path traversal, SQL-injection
//!    keywords. The result is then HTML-entity encoded.
//! 4. Length cap: strings longer than `max_value_length` characters are
//!    truncated with a warning; arrays keep at most `max_array_items`.
//!
//! Only name rejection makes the result invalid. Everything else is a
//! warning and the caller proceeds with the best-effort value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use promptlab_core::config::SandboxConfig;
use promptlab_core::{Parameters, SanitizedParameters, ValidationResult};

/// Nested arrays/objects deeper than this are replaced by an empty string.
const MAX_DEPTH: usize = 16;

/// Upper bound on cleansing passes; each pass strictly shrinks the input.
const MAX_CLEANSE_PASSES: usize = 8;

static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name regex must compile"));

static TEMPLATE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}|\{#.*?#\}").expect("template marker regex must compile")
});

static TEMPLATE_DELIMITERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{%|%\}|\{#|#\}").expect("template delimiter regex must compile")
});

static SCRIPT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\?(?:php|=).*?\?>|<\?(?:php|=)?|\?>").expect("script marker regex must compile")
});

static JAVASCRIPT_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("javascript uri regex must compile"));

static PATH_TRAVERSAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.\.[/\\]|%2e%2e(?:%2f|%5c)").expect("path traversal regex must compile")
});

static SQL_INJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\bDROP\s+TABLE\b",
        r"|\bDELETE\s+FROM\b",
        r"|\bUNION\s+(?:ALL\s+)?SELECT\b",
        r"|'\s*OR\s+'?1'?\s*=\s*'?1'?",
        r"|'\s*OR\s*''\s*=\s*'",
        r"|\bOR\s+1\s*=\s*1\b",
        r"|\s*--\s*$",
    ))
    .expect("sql regex must compile")
});

/// Sandbox output: the string-only parameter map plus what was altered or rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedSet {
    pub parameters: SanitizedParameters,
    pub validation: ValidationResult,
}

/// Stateless sanitizer; cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct ParameterSandbox {
    config: SandboxConfig,
}

impl ParameterSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Sanitize a full parameter map. Pure function of its input.
    pub fn sanitize(&self, parameters: &Parameters) -> SanitizedSet {
        let mut sanitized = SanitizedParameters::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (name, value) in parameters {
            if !self.is_valid_name(name) {
                tracing::debug!(name = %display_name(name), "rejected parameter name");
                errors.push(format!(
                    "invalid parameter name '{}': must start with a letter or underscore, \
                     contain only letters, digits and underscores, and be at most {} characters",
                    display_name(name),
                    self.config.max_name_length
                ));
                continue;
            }
            let clean = self.sanitize_value(name, value, &mut warnings);
            sanitized.insert(name.clone(), clean);
        }

        let received = parameters.len();
        let accepted = sanitized.len();
        let validation = ValidationResult::from_findings(errors, warnings)
            .with_metadata("parameters_received", received)
            .with_metadata("parameters_accepted", accepted)
            .with_metadata("parameters_rejected", received - accepted);

        SanitizedSet { parameters: sanitized, validation }
    }

    pub fn is_valid_name(&self, name: &str) -> bool {
        name.len() <= self.config.max_name_length && NAME.is_match(name)
    }

    /// Normalize, cleanse, encode and cap a single top-level value.
    pub fn sanitize_value(&self, name: &str, value: &Value, warnings: &mut Vec<String>) -> String {
        let text = match value {
            Value::String(s) => self.clean_text(name, s, warnings),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => {
                warnings.push(format!(
                    "parameter '{name}': unsupported type null converted to string"
                ));
                "null".to_string()
            }
            Value::Array(_) | Value::Object(_) => {
                let nested = self.sanitize_nested(name, value, 0, warnings);
                serde_json::to_string(&nested).unwrap_or_default()
            }
        };
        self.cap_length(name, text, warnings)
    }

    fn sanitize_nested(
        &self,
        name: &str,
        value: &Value,
        depth: usize,
        warnings: &mut Vec<String>,
    ) -> Value {
        if depth >= MAX_DEPTH {
            warnings.push(format!(
                "parameter '{name}': nesting deeper than {MAX_DEPTH} levels discarded"
            ));
            return Value::String(String::new());
        }
        match value {
            Value::String(s) => Value::String(self.clean_text(name, s, warnings)),
            Value::Array(items) => {
                if items.len() > self.config.max_array_items {
                    warnings.push(format!(
                        "parameter '{name}': array truncated from {} to {} items",
                        items.len(),
                        self.config.max_array_items
                    ));
                }
                Value::Array(
                    items
                        .iter()
                        .take(self.config.max_array_items)
                        .map(|item| self.sanitize_nested(name, item, depth + 1, warnings))
                        .collect(),
                )
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| {
                        let key = encode_html(&cleanse(key));
                        (key, self.sanitize_nested(name, item, depth + 1, warnings))
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn clean_text(&self, name: &str, raw: &str, warnings: &mut Vec<String>) -> String {
        let cleansed = cleanse(raw);
        if cleansed != raw {
            warnings.push(format!("parameter '{name}': potentially dangerous content removed"));
        }
        encode_html(&cleansed)
    }

    fn cap_length(&self, name: &str, text: String, warnings: &mut Vec<String>) -> String {
        let max = self.config.max_value_length;
        if text.chars().count() <= max {
            return text;
        }
        warnings.push(format!("parameter '{name}': value truncated to {max} characters"));
        let mut truncated: String = text.chars().take(max).collect();
        trim_partial_entity(&mut truncated);
        truncated
    }
}

/// Apply every cleansing rule until the text stops changing.
fn cleanse(input: &str) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_CLEANSE_PASSES {
        let next = cleanse_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn cleanse_once(input: &str) -> String {
    let text = TEMPLATE_MARKERS.replace_all(input, "");
    let text = TEMPLATE_DELIMITERS.replace_all(&text, "");
    let text = SCRIPT_MARKERS.replace_all(&text, "");
    let text = JAVASCRIPT_URI.replace_all(&text, "");
    let text = PATH_TRAVERSAL.replace_all(&text, "");
    SQL_INJECTION.replace_all(&text, "").into_owned()
}

/// Encode the five HTML-significant characters.
pub fn encode_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Drop a trailing `&...` fragment that truncation cut in half.
fn trim_partial_entity(text: &mut String) {
    if let Some(amp) = text.rfind('&') {
        let tail = &text[amp..];
        if !tail.contains(';') && tail.len() <= "&quot;".len() {
            text.truncate(amp);
        }
    }
}

/// Hostile names are echoed in error messages, so encode and shorten them.
fn display_name(name: &str) -> String {
    let short: String = name.chars().take(64).collect();
    encode_html(&short)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
