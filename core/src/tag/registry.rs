//! Tag factories and namespace dispatch
//!
//! Which factory builds an element is decided by its namespace, each
//! namespace class trying an ordered list of resolvers:
//!
//! | namespace            | resolvers                                  |
//! |----------------------|--------------------------------------------|
//! | none                 | any library, resource by name, data tag    |
//! | blank or [`ns::DATA`]| data tag                                   |
//! | [`ns::COMMAND`]      | any library                                |
//! | [`ns::FILE`]         | resource by name                           |
//! | anything else        | libraries of that namespace, resource      |

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Tag, TagKind};
use crate::parser::build::FactoryCx;
use crate::parser::xml::Element;
use crate::resource::{ResourceLocator, ResourceRef};

/// Namespace URIs understood by the parser
pub mod ns {
    /// Framework namespace: built-in library and qualified framework attributes
    pub const ROOT: &str = "urn:tagflow:root";
    pub const DATA: &str = "urn:tagflow:data";
    pub const COMMAND: &str = "urn:tagflow:command";
    pub const FILE: &str = "urn:tagflow:file";
}

/// Framework attributes a tag type reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagAttrs {
    /// Result-binding attribute
    pub id: Option<&'static str>,
    /// Guard attribute
    pub guard: Option<&'static str>,
    /// Negated guard attribute
    pub negated_guard: Option<&'static str>,
}

impl TagAttrs {
    pub const DEFAULT: TagAttrs = TagAttrs {
        id: Some("id"),
        guard: Some("if"),
        negated_guard: Some("unless"),
    };

    /// Result binding only, no guard
    pub const ID_ONLY: TagAttrs = TagAttrs {
        id: Some("id"),
        guard: None,
        negated_guard: None,
    };

    pub fn is_guard(&self, local: &str) -> bool {
        self.guard == Some(local) || self.negated_guard == Some(local)
    }
}

/// Result of [`TagFactory::create`]
pub struct Created {
    pub tag: Arc<dyn Tag>,
    /// The factory built the element's subtree itself
    pub children_parsed: bool,
}

impl Created {
    pub fn new(tag: impl Tag + 'static) -> Self {
        Self {
            tag: Arc::new(tag),
            children_parsed: false,
        }
    }

    /// Skip the generic descent into the element's children
    pub fn owning_subtree(tag: impl Tag + 'static) -> Self {
        Self {
            tag: Arc::new(tag),
            children_parsed: true,
        }
    }
}

/// Builds one kind of tag from its element
pub trait TagFactory: Send + Sync {
    fn kind(&self) -> TagKind;

    fn attrs(&self) -> TagAttrs {
        TagAttrs::DEFAULT
    }

    /// Keep free text as text instead of turning it into expression children
    fn keeps_text(&self) -> bool {
        false
    }

    /// Build the tag. The factory may rewrite `el`'s children before the
    /// parser descends into them.
    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created>;
}

/// Builds the root tag of an entity
pub trait EntityFactory: Send + Sync {
    fn create(&self, root: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Arc<dyn Tag>>;
}

/// Named set of tag factories in one namespace
#[derive(Clone)]
pub struct TagLibrary {
    pub name: String,
    pub namespace: String,
    tags: HashMap<String, Arc<dyn TagFactory>>,
}

impl TagLibrary {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            tags: HashMap::new(),
        }
    }

    pub fn tag(mut self, name: &str, factory: impl TagFactory + 'static) -> Self {
        self.tags.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TagFactory>> {
        self.tags.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }
}

/// A factory picked for an element, with the resource it invokes if any
#[derive(Clone)]
pub struct Resolved {
    pub factory: Arc<dyn TagFactory>,
    pub target: Option<ResourceRef>,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("kind", &self.factory.kind())
            .field("target", &self.target)
            .finish()
    }
}

type Resolver = fn(&Registry, &ResourceLocator, Option<&str>, &str) -> Option<Resolved>;

const UNQUALIFIED: &[Resolver] = &[from_any_library, from_resources, as_data];
const DATA_ONLY: &[Resolver] = &[as_data];
const COMMAND_ONLY: &[Resolver] = &[from_any_library];
const FILE_ONLY: &[Resolver] = &[from_resources];
const PLUGIN: &[Resolver] = &[from_namespace_library, from_resources];

fn resolvers(namespace: Option<&str>) -> &'static [Resolver] {
    match namespace {
        None => UNQUALIFIED,
        Some(uri) if uri.trim().is_empty() || uri == ns::DATA => DATA_ONLY,
        Some(ns::COMMAND) => COMMAND_ONLY,
        Some(ns::FILE) => FILE_ONLY,
        Some(_) => PLUGIN,
    }
}

fn from_any_library(reg: &Registry, _: &ResourceLocator, _: Option<&str>, local: &str) -> Option<Resolved> {
    reg.libraries
        .iter()
        .find_map(|lib| lib.get(local))
        .map(|factory| Resolved {
            factory: factory.clone(),
            target: None,
        })
}

fn from_namespace_library(
    reg: &Registry,
    _: &ResourceLocator,
    namespace: Option<&str>,
    local: &str,
) -> Option<Resolved> {
    reg.libraries
        .iter()
        .filter(|lib| Some(lib.namespace.as_str()) == namespace)
        .find_map(|lib| lib.get(local))
        .map(|factory| Resolved {
            factory: factory.clone(),
            target: None,
        })
}

fn from_resources(reg: &Registry, locator: &ResourceLocator, _: Option<&str>, local: &str) -> Option<Resolved> {
    locator.get(local).map(|resource| Resolved {
        factory: reg.invoke.clone(),
        target: Some(resource),
    })
}

fn as_data(reg: &Registry, _: &ResourceLocator, _: Option<&str>, _: &str) -> Option<Resolved> {
    Some(Resolved {
        factory: reg.data.clone(),
        target: None,
    })
}

/// Tag libraries and entity root factories, fixed after start-up
pub struct Registry {
    libraries: Vec<TagLibrary>,
    roots: HashMap<String, Arc<dyn EntityFactory>>,
    data: Arc<dyn TagFactory>,
    invoke: Arc<dyn TagFactory>,
}

impl Registry {
    /// `data` builds data tags, `invoke` builds invocations of resources
    pub fn new(data: impl TagFactory + 'static, invoke: impl TagFactory + 'static) -> Self {
        Self {
            libraries: Vec::new(),
            roots: HashMap::new(),
            data: Arc::new(data),
            invoke: Arc::new(invoke),
        }
    }

    /// Libraries are searched in registration order
    pub fn add_library(&mut self, library: TagLibrary) {
        self.libraries.push(library);
    }

    pub fn add_root(&mut self, name: &str, factory: impl EntityFactory + 'static) {
        self.roots.insert(name.to_string(), Arc::new(factory));
    }

    pub fn root(&self, name: &str) -> Option<Arc<dyn EntityFactory>> {
        self.roots.get(name).cloned()
    }

    pub fn libraries(&self) -> &[TagLibrary] {
        &self.libraries
    }

    pub fn resolve(&self, locator: &ResourceLocator, namespace: Option<&str>, local: &str) -> Result<Resolved> {
        resolvers(namespace)
            .iter()
            .find_map(|resolve| resolve(self, locator, namespace, local))
            .ok_or_else(|| {
                anyhow!(
                    "Unknown tag <{}> in namespace {}",
                    local,
                    namespace.unwrap_or("<none>")
                )
            })
    }
}
