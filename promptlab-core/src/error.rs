//! Error types for promptlab-core.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy shared by every stage of the template-testing pipeline.
///
/// Values of this type travel inside result envelopes rather than being
/// propagated with `?` across component boundaries, so it is `Clone` and
/// carries only owned strings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateError {
    /// Malformed parameter name or shape. Never retried.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The active engine could not parse the template.
    #[error("template parse error: {message}")]
    Parse { message: String },

    /// Substitution or evaluation failed at render time.
    #[error("template render error: {message}")]
    Render { message: String },

    /// The operation exceeded its wall-clock bound.
    #[error("execution timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    /// The circuit breaker rejected the call without attempting it.
    #[error("circuit open: render path unhealthy, retry in {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// Unknown engine, prompt, or prompt version. `entity` says which.
    #[error("{entity} not found: {name}")]
    NotFound { entity: String, name: String },

    /// An internal component broke its contract (a bug, not a user error).
    #[error("internal contract violation: {message}")]
    Contract { message: String },
}

impl TemplateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render { message: message.into() }
    }

    pub fn not_found(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { entity: entity.into(), name: name.into() }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract { message: message.into() }
    }

    /// Stable snake_case label, used as a metadata value and in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateError::Validation { .. } => "validation",
            TemplateError::Parse { .. } => "parse",
            TemplateError::Render { .. } => "render",
            TemplateError::Timeout { .. } => "timeout",
            TemplateError::CircuitOpen { .. } => "circuit_open",
            TemplateError::NotFound { .. } => "not_found",
            TemplateError::Contract { .. } => "contract",
        }
    }
}

/// All errors that can arise from the file-backed prompt store and config loading.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes the offending file path.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.promptlab/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No prompt file exists for the requested id.
    #[error("prompt not found: {id}")]
    PromptNotFound { id: String },

    /// The prompt exists but has no such version.
    #[error("prompt {id} has no version {version}")]
    VersionNotFound { id: String, version: u32 },

    /// `create` was called for an id that is already stored.
    #[error("prompt already exists: {id}")]
    AlreadyExists { id: String },

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    #[error("invalid prompt id '{id}': use letters, digits, '-' and '_'")]
    InvalidId { id: String },
}

impl From<StoreError> for TemplateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PromptNotFound { id } => TemplateError::not_found("prompt", id),
            StoreError::VersionNotFound { id, version } => {
                TemplateError::not_found("prompt version", format!("{id}@{version}"))
            }
            invalid @ StoreError::InvalidId { .. } => TemplateError::validation(invalid.to_string()),
            other => TemplateError::contract(other.to_string()),
        }
    }
}
