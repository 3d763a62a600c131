//! promptlab core library — result types, error taxonomy, configuration,
//! and the prompt/version lookup collaborator.
//!
//! - [`types`] — value objects passed between pipeline stages
//! - [`error`] — [`TemplateError`] and [`StoreError`]
//! - [`config`] — [`PipelineConfig`] loading
//! - [`store`] — [`PromptSource`] plus YAML and in-memory stores

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{PipelineConfig, TimeoutMode};
pub use error::{StoreError, TemplateError};
pub use store::{InMemoryPromptStore, PromptSource, YamlPromptStore};
pub use types::{
    DiscoveredParameters, ExecutionResult, Metadata, ParameterInfo, ParameterKind, Parameters,
    ParseResult, Prompt, PromptId, PromptTemplate, PromptVersion, RenderResult,
    SanitizedParameters, TestContext, TestData, TestResult, ValidationResult, DEFAULT_ENGINE,
    DEFAULT_TIMEOUT_MS,
};
