//! Prompt/version lookup.
//!
//! # Storage layout
//!
//! ```text
//! ~/.promptlab/
//!   config.yaml
//!   prompts/
//!     <prompt_id>.yaml   (one file per prompt, full version history — mode 0600)
//! ```
//!
//! # API pattern
//!
//! [`YamlPromptStore`] is rooted at an explicit home directory so tests can
//! point it at a `TempDir`; [`YamlPromptStore::from_home_dir`] derives the
//! home from `dirs::home_dir()`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use crate::config::promptlab_root;
use crate::error::{StoreError, TemplateError};
use crate::types::{Prompt, PromptId, PromptTemplate, PromptVersion};

/// Narrow lookup interface the testing service depends on.
pub trait PromptSource: Send + Sync {
    /// Resolve a prompt's template body. `version = None` means the active version.
    fn fetch_template(
        &self,
        prompt_id: &PromptId,
        version: Option<u32>,
    ) -> Result<PromptTemplate, TemplateError>;
}

fn resolve(prompt: &Prompt, version: Option<u32>) -> Result<PromptTemplate, StoreError> {
    let found = prompt.version(version).ok_or_else(|| StoreError::VersionNotFound {
        id: prompt.id.0.clone(),
        version: version.unwrap_or(prompt.active_version),
    })?;
    Ok(prompt.to_template(found))
}

fn check_id(id: &PromptId) -> Result<(), StoreError> {
    let ok = !id.0.is_empty()
        && id.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId { id: id.0.clone() })
    }
}

fn new_prompt(id: PromptId, name: String, body: String, change_note: Option<String>) -> Prompt {
    let now = Utc::now();
    Prompt {
        id,
        name,
        active_version: 1,
        versions: vec![PromptVersion { number: 1, body, change_note, created_at: now }],
        created_at: now,
        updated_at: now,
    }
}

fn append_version(prompt: &mut Prompt, body: String, change_note: Option<String>) -> u32 {
    let now = Utc::now();
    let number = prompt.latest_version_number() + 1;
    prompt.versions.push(PromptVersion { number, body, change_note, created_at: now });
    prompt.active_version = number;
    prompt.updated_at = now;
    number
}

// ---------------------------------------------------------------------------
// 1. YAML-backed store
// ---------------------------------------------------------------------------

/// One YAML file per prompt under `<home>/.promptlab/prompts/`.
#[derive(Debug, Clone)]
pub struct YamlPromptStore {
    home: PathBuf,
}

impl YamlPromptStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Store rooted at the current user's home directory.
    pub fn from_home_dir() -> Result<Self, StoreError> {
        dirs::home_dir().map(Self::new).ok_or(StoreError::HomeNotFound)
    }

    /// `<home>/.promptlab/prompts/`
    pub fn prompts_dir(&self) -> PathBuf {
        promptlab_root(&self.home).join("prompts")
    }

    /// `<home>/.promptlab/prompts/<id>.yaml` — pure, no I/O.
    pub fn prompt_path(&self, id: &PromptId) -> PathBuf {
        self.prompts_dir().join(format!("{}.yaml", id.0))
    }

    /// Load a prompt. `StoreError::PromptNotFound` if absent,
    /// `StoreError::Parse` (with path) if malformed.
    pub fn load(&self, id: &PromptId) -> Result<Prompt, StoreError> {
        check_id(id)?;
        let path = self.prompt_path(id);
        if !path.exists() {
            return Err(StoreError::PromptNotFound { id: id.0.clone() });
        }
        let contents = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
    }

    /// All stored prompts, sorted by id.
    pub fn list(&self) -> Result<Vec<Prompt>, StoreError> {
        let dir = self.prompts_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut prompts = Vec::with_capacity(entries.len());
        for entry in entries {
            let contents = std::fs::read_to_string(entry.path())?;
            let prompt: Prompt = serde_yaml::from_str(&contents)
                .map_err(|source| StoreError::Parse { path: entry.path(), source })?;
            prompts.push(prompt);
        }
        Ok(prompts)
    }

    /// Create a prompt with its first version.
    pub fn create(
        &self,
        id: PromptId,
        name: impl Into<String>,
        body: impl Into<String>,
        change_note: Option<String>,
    ) -> Result<Prompt, StoreError> {
        check_id(&id)?;
        if self.prompt_path(&id).exists() {
            return Err(StoreError::AlreadyExists { id: id.0 });
        }
        let prompt = new_prompt(id, name.into(), body.into(), change_note);
        self.save(&prompt)?;
        tracing::info!(prompt = %prompt.id, version = 1, "prompt created");
        Ok(prompt)
    }

    /// Append a new version and make it active. Returns the new version number.
    pub fn add_version(
        &self,
        id: &PromptId,
        body: impl Into<String>,
        change_note: Option<String>,
    ) -> Result<u32, StoreError> {
        let mut prompt = self.load(id)?;
        let number = append_version(&mut prompt, body.into(), change_note);
        self.save(&prompt)?;
        tracing::info!(prompt = %id, version = number, "prompt version added");
        Ok(number)
    }

    /// Point the prompt at an existing version.
    pub fn activate(&self, id: &PromptId, version: u32) -> Result<(), StoreError> {
        let mut prompt = self.load(id)?;
        if prompt.version(Some(version)).is_none() {
            return Err(StoreError::VersionNotFound { id: id.0.clone(), version });
        }
        let previous = prompt.active_version;
        prompt.active_version = version;
        prompt.updated_at = Utc::now();
        self.save(&prompt)?;
        tracing::info!(prompt = %id, from = previous, to = version, "active version changed");
        Ok(())
    }

    /// Atomic save: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    pub fn save(&self, prompt: &Prompt) -> Result<(), StoreError> {
        let dir = self.prompts_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            set_dir_permissions(&dir)?;
        }
        let path = self.prompt_path(&prompt.id);
        let tmp_path = path.with_file_name(format!("{}.yaml.tmp", prompt.id.0));

        let yaml = serde_yaml::to_string(prompt)?;
        std::fs::write(&tmp_path, yaml)?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

impl PromptSource for YamlPromptStore {
    fn fetch_template(
        &self,
        prompt_id: &PromptId,
        version: Option<u32>,
    ) -> Result<PromptTemplate, TemplateError> {
        let prompt = self.load(prompt_id)?;
        Ok(resolve(&prompt, version)?)
    }
}

// ---------------------------------------------------------------------------
// 2. In-memory store
// ---------------------------------------------------------------------------

/// Process-local store used by tests and embedders without a filesystem.
#[derive(Debug, Default)]
pub struct InMemoryPromptStore {
    prompts: RwLock<BTreeMap<PromptId, Prompt>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, prompt: Prompt) {
        self.prompts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prompt.id.clone(), prompt);
    }

    pub fn create(
        &self,
        id: impl Into<PromptId>,
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> Prompt {
        let prompt = new_prompt(id.into(), name.into(), body.into(), None);
        self.insert(prompt.clone());
        prompt
    }

    pub fn add_version(
        &self,
        id: &PromptId,
        body: impl Into<String>,
        change_note: Option<String>,
    ) -> Result<u32, StoreError> {
        let mut prompts = self.prompts.write().unwrap_or_else(PoisonError::into_inner);
        let prompt = prompts
            .get_mut(id)
            .ok_or_else(|| StoreError::PromptNotFound { id: id.0.clone() })?;
        Ok(append_version(prompt, body.into(), change_note))
    }
}

impl PromptSource for InMemoryPromptStore {
    fn fetch_template(
        &self,
        prompt_id: &PromptId,
        version: Option<u32>,
    ) -> Result<PromptTemplate, TemplateError> {
        let prompts = self.prompts.read().unwrap_or_else(PoisonError::into_inner);
        let prompt = prompts
            .get(prompt_id)
            .ok_or_else(|| StoreError::PromptNotFound { id: prompt_id.0.clone() })?;
        Ok(resolve(prompt, version)?)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id() -> PromptId {
        PromptId::from("greeting")
    }

    #[test]
    fn prompt_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        assert!(store.prompt_path(&id()).ends_with(".promptlab/prompts/greeting.yaml"));
    }

    #[test]
    fn create_and_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        store.create(id(), "Greeting", "Hello {{ name }}", None).expect("create");

        let loaded = store.load(&id()).expect("load");
        assert_eq!(loaded.name, "Greeting");
        assert_eq!(loaded.active_version, 1);
        assert_eq!(loaded.versions.len(), 1);
    }

    #[test]
    fn create_twice_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        store.create(id(), "Greeting", "a", None).expect("create");
        let err = store.create(id(), "Greeting", "b", None).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        store.create(id(), "Greeting", "a", None).expect("create");
        let tmp = store.prompt_path(&id()).with_file_name("greeting.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn add_version_activates_it() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        store.create(id(), "Greeting", "v1", None).expect("create");
        let number = store.add_version(&id(), "v2", Some("friendlier".into())).expect("add");
        assert_eq!(number, 2);

        let active = store.fetch_template(&id(), None).expect("fetch");
        assert_eq!(active.body, "v2");
        assert_eq!(active.change_note.as_deref(), Some("friendlier"));

        let first = store.fetch_template(&id(), Some(1)).expect("fetch v1");
        assert_eq!(first.body, "v1");
    }

    #[test]
    fn activate_unknown_version_fails() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        store.create(id(), "Greeting", "v1", None).expect("create");
        let err = store.activate(&id(), 4).unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound { version: 4, .. }));
    }

    #[test]
    fn ids_that_escape_the_prompts_dir_are_rejected() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        for bad in ["../evil", "a/b", "", "dot.ted"] {
            let err = store.create(PromptId::from(bad), "x", "y", None).unwrap_err();
            assert!(matches!(err, StoreError::InvalidId { .. }), "{bad}");
        }
        let err = store.fetch_template(&PromptId::from("../evil"), None).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn missing_prompt_is_not_found() {
        let home = TempDir::new().expect("tempdir");
        let store = YamlPromptStore::new(home.path());
        let err = store.fetch_template(&id(), None).unwrap_err();
        assert_eq!(err, TemplateError::not_found("prompt", "greeting"));
    }

    #[test]
    fn in_memory_store_resolves_versions() {
        let store = InMemoryPromptStore::new();
        store.create("greeting", "Greeting", "v1");
        store.add_version(&id(), "v2", None).expect("add");
        assert_eq!(store.fetch_template(&id(), None).expect("fetch").version, 2);
        let err = store.fetch_template(&id(), Some(3)).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
