//! Error types internal to promptlab-renderer.
//!
//! Engines never return these to callers; they are flattened into a
//! [`TemplateError`] at the engine boundary.

use std::error::Error as StdError;

use thiserror::Error;

use promptlab_core::TemplateError;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Compiling the template failed.
    #[error("{}", flatten(.0))]
    Compile(#[source] tera::Error),

    /// Evaluating a compiled template failed.
    #[error("{}", flatten(.0))]
    Evaluate(#[source] tera::Error),
}

impl From<RenderError> for TemplateError {
    fn from(err: RenderError) -> Self {
        match &err {
            RenderError::Compile(_) => TemplateError::parse(err.to_string()),
            RenderError::Evaluate(_) => TemplateError::render(err.to_string()),
        }
    }
}

/// Tera reports the useful detail (line, column, missing variable) in the
/// source chain rather than the top-level message.
fn flatten(err: &tera::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        source = inner.source();
    }
    parts.join(": ")
}
