//! Engine assembly
//!
//! Collects settings, tag libraries, root factories, listeners and
//! resources, then builds an [`Engine`] whose registry is fixed from then on.
//!
//! # Example
//!
//! ```rust,no_run
//! use tagflow_core::init::EngineBuilder;
//! use tagflow_core::values::Val;
//!
//! let engine = EngineBuilder::new()
//!     .with_tracing()
//!     .resource_dir("flows")
//!     .build()?;
//! let result = engine.run("main", [("user", Val::from("alice"))])?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::Settings;
use crate::executor::{Engine, ExecutionListener};
use crate::expr::{Evaluator, TemplateEvaluator};
use crate::parser::Parser;
use crate::resource::{MemoryResource, ResourceLocator, ResourceRef};
use crate::stdlib;
use crate::tag::registry::{EntityFactory, Registry, TagLibrary};
use crate::telemetry;

/// Builder for an [`Engine`]
pub struct EngineBuilder {
    settings: Settings,
    evaluator: Arc<dyn Evaluator>,
    registry: Registry,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    resources: Vec<ResourceRef>,
    resource_dirs: Vec<PathBuf>,
    tracing: bool,
}

impl EngineBuilder {
    /// Builder with default settings and the built-in library
    pub fn new() -> Self {
        Self::from_settings(Settings::default())
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            evaluator: Arc::new(TemplateEvaluator),
            registry: stdlib::registry(),
            listeners: Vec::new(),
            resources: Vec::new(),
            resource_dirs: Vec::new(),
            tracing: false,
        }
    }

    /// Builder with settings loaded from the default config layers, logging
    /// through the configured `log_filter`
    pub fn load() -> Result<Self> {
        Ok(Self::from_settings(Settings::load()?).with_tracing())
    }

    /// Install the global log subscriber on `build`, filtered by the
    /// settings' `log_filter` unless `RUST_LOG` is set
    pub fn with_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the expression language
    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Arc::new(evaluator);
        self
    }

    /// Additional tag library, searched after the built-in one
    pub fn library(mut self, library: TagLibrary) -> Self {
        self.registry.add_library(library);
        self
    }

    /// Additional entity root tag
    pub fn root(mut self, name: &str, factory: impl EntityFactory + 'static) -> Self {
        self.registry.add_root(name, factory);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn resource(mut self, resource: ResourceRef) -> Self {
        self.resources.push(resource);
        self
    }

    /// In-memory resource named `name`
    pub fn source(self, name: &str, xml: &str) -> Self {
        self.resource(ResourceRef::new(MemoryResource::new(name, xml)))
    }

    /// Directory scanned for `*.xml` resources, after the configured ones
    pub fn resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dirs.push(dir.into());
        self
    }

    pub fn build(self) -> Result<Engine> {
        if self.tracing && telemetry::init_tracing(&self.settings.log_filter) {
            debug!(filter = %self.settings.log_filter, "Installed log subscriber");
        }

        let locator = Arc::new(ResourceLocator::new());
        for dir in self.settings.resource_dirs.iter().chain(&self.resource_dirs) {
            locator
                .add_dir(dir)
                .with_context(|| format!("Failed to scan resource directory {}", dir.display()))?;
        }
        for resource in self.resources {
            locator.add(resource);
        }

        let parser = Parser::new(self.registry, locator, self.evaluator).with_cache(self.settings.cache_entities);
        let mut engine = Engine::new(parser, self.settings);
        for listener in self.listeners {
            engine.add_listener(listener);
        }
        Ok(engine)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
