//! Engine registry: owns every registered engine, its priority, and the
//! default-engine pointer, and answers "which engine should render this".
//!
//! Selection never fails. When no registered engine is available the
//! registry synthesizes a degraded [`EngineAdapter`] around the fallback
//! engine.
//!
//! The table is shared by all concurrent requests, so it lives behind an
//! `RwLock`. Engine methods are never called while the lock is held.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use serde::Serialize;

use promptlab_core::config::EngineConfig;
use promptlab_core::TemplateError;

use crate::engine::{EngineAdapter, TemplateEngine};
use crate::fallback::FallbackEngine;
use crate::tera_engine::TeraEngine;

struct Entry {
    name: String,
    engine: Arc<dyn TemplateEngine>,
    priority: i32,
}

#[derive(Default)]
struct Table {
    /// Registration order; used as the priority tie-breaker.
    entries: Vec<Entry>,
    default: Option<String>,
}

impl Table {
    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

/// Row of `promptlab engines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
    pub priority: i32,
    pub available: bool,
    pub is_default: bool,
    pub features: Vec<String>,
}

#[derive(Default)]
pub struct EngineRegistry {
    table: RwLock<Table>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tera as the primary engine plus the literal fallback, prioritised per `config`.
    pub fn with_defaults(config: &EngineConfig) -> Self {
        let registry = Self::new();
        registry.register_with_priority(
            Arc::new(TeraEngine::new(config.autoescape)),
            config.primary_priority,
            false,
        );
        registry.register_with_priority(Arc::new(FallbackEngine::new()), config.fallback_priority, false);
        if registry.has_engine(&config.default_engine) {
            registry.write().default = Some(config.default_engine.clone());
        } else {
            tracing::warn!(engine = %config.default_engine, "configured default engine is not registered");
        }
        registry
    }

    /// Register `engine` under its own name.
    ///
    /// A name already in use has its engine replaced in place, keeping its
    /// priority and registration slot. New names start at priority 0. The
    /// first engine registered becomes the default unless another is later
    /// registered with `as_default`.
    pub fn register(&self, engine: Arc<dyn TemplateEngine>, as_default: bool) {
        self.insert(engine, None, as_default);
    }

    pub fn register_with_priority(&self, engine: Arc<dyn TemplateEngine>, priority: i32, as_default: bool) {
        self.insert(engine, Some(priority), as_default);
    }

    fn insert(&self, engine: Arc<dyn TemplateEngine>, priority: Option<i32>, as_default: bool) {
        let name = engine.name().to_string();
        let mut table = self.write();
        match table.position(&name) {
            Some(idx) => {
                let entry = &mut table.entries[idx];
                entry.engine = engine;
                if let Some(priority) = priority {
                    entry.priority = priority;
                }
                tracing::debug!(engine = %name, "engine replaced");
            }
            None => {
                table.entries.push(Entry { name: name.clone(), engine, priority: priority.unwrap_or(0) });
                tracing::debug!(engine = %name, priority = priority.unwrap_or(0), "engine registered");
            }
        }
        if as_default || table.default.is_none() {
            tracing::debug!(engine = %name, "default engine set");
            table.default = Some(name);
        }
    }

    pub fn set_priority(&self, name: &str, priority: i32) -> Result<(), TemplateError> {
        let mut table = self.write();
        let idx = table.position(name).ok_or_else(|| TemplateError::not_found("engine", name))?;
        table.entries[idx].priority = priority;
        Ok(())
    }

    pub fn priority(&self, name: &str) -> Option<i32> {
        let table = self.read();
        table.position(name).map(|idx| table.entries[idx].priority)
    }

    pub fn get_engine(&self, name: &str) -> Result<Arc<dyn TemplateEngine>, TemplateError> {
        let table = self.read();
        table
            .position(name)
            .map(|idx| Arc::clone(&table.entries[idx].engine))
            .ok_or_else(|| TemplateError::not_found("engine", name))
    }

    pub fn has_engine(&self, name: &str) -> bool {
        self.read().position(name).is_some()
    }

    pub fn default_engine(&self) -> Option<Arc<dyn TemplateEngine>> {
        let table = self.read();
        let name = table.default.as_deref()?;
        table.position(name).map(|idx| Arc::clone(&table.entries[idx].engine))
    }

    pub fn default_engine_name(&self) -> Option<String> {
        self.read().default.clone()
    }

    /// Unregister `name`. Removing the default hands the role to the
    /// earliest-registered remaining engine, or to nobody.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn TemplateEngine>> {
        let mut table = self.write();
        let idx = table.position(name)?;
        let removed = table.entries.remove(idx);
        if table.default.as_deref() == Some(name) {
            table.default = table.entries.first().map(|e| e.name.clone());
            tracing::info!(removed = %name, default = ?table.default, "default engine reassigned");
        }
        Some(removed.engine)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read().entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every engine, highest priority first, ties in registration order.
    pub fn all_engines(&self) -> Vec<Arc<dyn TemplateEngine>> {
        self.ranked().into_iter().map(|(engine, _)| engine).collect()
    }

    /// Highest-priority available engine, or a degraded fallback adapter.
    pub fn best_available_engine(&self) -> Arc<dyn TemplateEngine> {
        if let Some((engine, _)) = self.ranked().into_iter().find(|(e, _)| e.is_available()) {
            return engine;
        }
        tracing::warn!("no template engine available, degrading to fallback");
        Arc::new(EngineAdapter::degraded(Arc::new(FallbackEngine::new())))
    }

    /// `name` if it is registered and available, otherwise the best available engine.
    pub fn preferred_engine(&self, name: &str) -> Arc<dyn TemplateEngine> {
        if !name.is_empty() {
            match self.get_engine(name) {
                Ok(engine) if engine.is_available() => return engine,
                Ok(_) => tracing::info!(engine = %name, "preferred engine unavailable"),
                Err(_) => tracing::info!(engine = %name, "preferred engine not registered"),
            }
        }
        self.best_available_engine()
    }

    pub fn entries(&self) -> Vec<EngineInfo> {
        let default = self.default_engine_name();
        self.ranked()
            .into_iter()
            .map(|(engine, priority)| EngineInfo {
                name: engine.name().to_string(),
                version: engine.version().to_string(),
                priority,
                available: engine.is_available(),
                is_default: default.as_deref() == Some(engine.name()),
                features: engine.supported_features(),
            })
            .collect()
    }

    fn ranked(&self) -> Vec<(Arc<dyn TemplateEngine>, i32)> {
        let mut ranked: Vec<_> = self
            .read()
            .entries
            .iter()
            .map(|e| (Arc::clone(&e.engine), e.priority))
            .collect();
        // Stable: equal priorities keep registration order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}
