//! Pipeline configuration loaded from `~/.promptlab/config.yaml`.
//!
//! Every field has a default, so a partial (or absent) file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::DEFAULT_ENGINE;

pub const CONFIG_FILE: &str = "config.yaml";

/// `<home>/.promptlab`
pub fn promptlab_root(home: &Path) -> PathBuf {
    home.join(".promptlab")
}

/// `<home>/.promptlab/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    promptlab_root(home).join(CONFIG_FILE)
}

/// How the timeout guard bounds an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutMode {
    /// Run on a worker thread and abandon it once the deadline passes.
    #[default]
    Preemptive,
    /// Run inline; a late completion is reported as a timeout after the fact.
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_timeout_ms: u64,
    pub mode: TimeoutMode,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 5000, mode: TimeoutMode::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_secs: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub max_value_length: usize,
    pub max_array_items: usize,
    pub max_name_length: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self { max_value_length: 10_000, max_array_items: 100, max_name_length: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_engine: String,
    pub autoescape: bool,
    pub primary_priority: i32,
    pub fallback_priority: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_engine: DEFAULT_ENGINE.to_string(),
            autoescape: true,
            primary_priority: 100,
            fallback_priority: 0,
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub timeout: TimeoutConfig,
    pub breaker: BreakerConfig,
    pub sandbox: SandboxConfig,
    pub engine: EngineConfig,
}

/// Load the configuration under `home`, falling back to defaults when the
/// file does not exist.
pub fn load_config_at(home: &Path) -> Result<PipelineConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<PipelineConfig, StoreError> {
    let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
    load_config_at(&home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let config = load_config_at(home.path()).expect("load");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.timeout.default_timeout_ms, 5000);
        assert_eq!(config.sandbox.max_value_length, 10_000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(promptlab_root(home.path())).expect("mkdir");
        std::fs::write(
            config_path_at(home.path()),
            "breaker:\n  failure_threshold: 2\ntimeout:\n  mode: advisory\n",
        )
        .expect("write");

        let config = load_config_at(home.path()).expect("load");
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.recovery_timeout_secs, 60);
        assert_eq!(config.timeout.mode, TimeoutMode::Advisory);
        assert_eq!(config.engine.default_engine, "tera");
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(promptlab_root(home.path())).expect("mkdir");
        std::fs::write(config_path_at(home.path()), "breaker: [unclosed").expect("write");

        let err = load_config_at(home.path()).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("config.yaml"));
    }
}
