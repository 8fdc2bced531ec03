//! Resource → entity parsing
//!
//! Parsing reads the resource's XML, picks the entity factory registered
//! for the root tag and builds the instruction tree element by element.
//! Parsed entities are cached per resource and re-parsed when the
//! resource's modification time changes.

pub mod build;
pub mod xml;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::expr::Evaluator;
use crate::resource::{ResourceLocator, ResourceRef};
use crate::tag::registry::Registry;
use crate::tag::{Entity, EntityRef};
use build::TreeBuilder;

pub use build::{FactoryCx, EXPRESSION_TAG};
pub use xml::{Attr, Element, Node};

pub struct Parser {
    registry: Registry,
    locator: Arc<ResourceLocator>,
    evaluator: Arc<dyn Evaluator>,
    cache: RwLock<HashMap<ResourceRef, EntityRef>>,
    cache_enabled: bool,
}

impl Parser {
    pub fn new(registry: Registry, locator: Arc<ResourceLocator>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            registry,
            locator,
            evaluator,
            cache: RwLock::new(HashMap::new()),
            cache_enabled: true,
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    /// Entity of the resource registered under `name`
    pub fn load(&self, name: &str) -> Result<EntityRef, ParseError> {
        let resource = self
            .locator
            .get(name)
            .ok_or_else(|| ParseError::UnknownResource(name.to_string()))?;
        self.parse(&resource, false)?
            .ok_or_else(|| ParseError::NotExecutable(resource.path().to_string()))
    }

    /// Parse `resource`, or return its cached entity if it has not changed.
    ///
    /// Absent when the resource does not exist or its root tag is unknown.
    pub fn parse(&self, resource: &ResourceRef, force_refresh: bool) -> Result<Option<EntityRef>, ParseError> {
        self.parse_in(resource, force_refresh, &mut Vec::new())
    }

    pub(crate) fn parse_in(
        &self,
        resource: &ResourceRef,
        force_refresh: bool,
        in_progress: &mut Vec<EntityRef>,
    ) -> Result<Option<EntityRef>, ParseError> {
        if let Some(entity) = in_progress.iter().find(|e| e.resource() == resource) {
            debug!(resource = %resource, "Resource is already being parsed, reusing it");
            return Ok(Some(entity.clone()));
        }

        if !force_refresh {
            if let Some(cached) = self.cached(resource) {
                if !cached.is_modified() {
                    debug!(resource = %resource, "Using cached entity");
                    return Ok(Some(cached));
                }
            }
        }

        if !resource.exists() {
            warn!(resource = %resource, "Resource does not exist");
            return Ok(None);
        }

        let timestamp = resource.modified();
        let bytes = resource.read_to_end().map_err(|source| ParseError::Io {
            resource: resource.path().to_string(),
            source,
        })?;
        let mut root = xml::read_document(&bytes).map_err(|e| ParseError::Xml {
            resource: resource.path().to_string(),
            message: e.to_string(),
        })?;

        let Some(factory) = self.registry.root(&root.local) else {
            warn!(resource = %resource, root = %root.local, "Unknown root tag, resource ignored");
            return Ok(None);
        };

        debug!(resource = %resource, root = %root.local, "Parsing resource");
        let entity = Arc::new(Entity::new(resource.clone(), &root.local, timestamp));
        in_progress.push(entity.clone());
        let built = TreeBuilder::new(self, &entity, in_progress).build(&mut root, factory.as_ref());
        in_progress.pop();
        entity.complete(built?);

        if self.cache_enabled && entity.is_cacheable() && !resource.name().trim().is_empty() {
            self.cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(resource.clone(), entity.clone());
        }
        Ok(Some(entity))
    }

    pub fn cached(&self, resource: &ResourceRef) -> Option<EntityRef> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }

    pub fn evict(&self, resource: &ResourceRef) -> Option<EntityRef> {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource)
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
