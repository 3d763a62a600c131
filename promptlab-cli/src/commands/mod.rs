pub mod engines;
pub mod params;
pub mod prompt;
pub mod render;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use promptlab_core::{config, Parameters, YamlPromptStore};
use promptlab_testing::TestingService;

// ---------------------------------------------------------------------------
// Shared argument types
// ---------------------------------------------------------------------------

/// One `-p key=value` pair. The value is JSON when it parses as JSON,
/// otherwise a plain string.
#[derive(Debug, Clone)]
pub struct ParamArg {
    pub name: String,
    pub value: Value,
}

impl FromStr for ParamArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
        if name.is_empty() {
            return Err(format!("missing parameter name in '{s}'"));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        Ok(Self { name: name.to_string(), value })
    }
}

pub fn collect_params(args: Vec<ParamArg>) -> Parameters {
    args.into_iter().map(|p| (p.name, p.value)).collect()
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn prompt_store() -> Result<YamlPromptStore> {
    Ok(YamlPromptStore::new(home_dir()?))
}

/// Pipeline built from `~/.promptlab/config.yaml`, backed by the YAML prompt store.
pub fn load_service() -> Result<TestingService> {
    let home = home_dir()?;
    let config = config::load_config_at(&home).context("failed to load ~/.promptlab/config.yaml")?;
    tracing::debug!(
        engine = %config.engine.default_engine,
        timeout_ms = config.timeout.default_timeout_ms,
        "pipeline configured"
    );
    Ok(TestingService::from_config(&config).with_prompt_source(Arc::new(YamlPromptStore::new(home))))
}

/// `@path` reads the template from a file; anything else is the template itself.
pub fn read_template(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read template file '{path}'")),
        None => Ok(arg.to_string()),
    }
}
