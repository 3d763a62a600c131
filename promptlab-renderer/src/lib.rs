//! # promptlab-renderer
//!
//! Template engines behind one capability trait, and the registry that
//! picks among them.
//!
//! ## Usage
//!
//! ```rust
//! use promptlab_core::config::EngineConfig;
//! use promptlab_core::Parameters;
//! use promptlab_renderer::EngineRegistry;
//!
//! let registry = EngineRegistry::with_defaults(&EngineConfig::default());
//! let mut params = Parameters::new();
//! params.insert("name".into(), "World".into());
//! let result = registry.best_available_engine().render("Hello {{ name }}!", &params);
//! assert_eq!(result.content(), "Hello World!");
//! ```

pub mod engine;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod registry;
pub mod tera_engine;

pub use engine::{EngineAdapter, TemplateEngine};
pub use error::RenderError;
pub use extractor::extract_parameters;
pub use fallback::{FallbackEngine, FALLBACK_ENGINE_NAME};
pub use registry::{EngineInfo, EngineRegistry};
pub use tera_engine::{TeraEngine, TERA_ENGINE_NAME};
