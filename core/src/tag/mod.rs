//! Instruction tree model
//!
//! An [`Entity`] is one parsed resource. Its instructions live in an
//! [`InstructionTree`] arena, immutable once parsing completes and shared by
//! every invocation. Per-call state never lives on an instruction.

pub mod aggregate;
pub mod registry;
pub mod schema;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::EngineError;
use crate::executor::{Call, Outcome};
use crate::expr::Expression;
use crate::resource::ResourceRef;
use crate::scope::ScopeView;

static NEXT_ENTITY_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one parsed entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey(pub(crate) u64);

/// Index of an instruction within its entity's tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Structural role of a tag, used by dispatch and by the parser to decide
/// how neighbouring tags are wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Root of an entity
    Entity,
    /// Plain action
    Action,
    /// Opens its own scope and takes parameters
    Invoker,
    /// Aggregates its children into a value
    Data,
    /// Transparent container: no scope of its own, passes child results up
    Control,
}

/// Behaviour of one instruction
pub trait Tag: Send + Sync + fmt::Debug {
    /// Implementation name shown in diagnostics
    fn type_name(&self) -> &'static str;

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError>;

    /// Runs instead of [`Tag::execute`] when the guard rejects the node
    fn on_not_executed(&self, _call: &mut Call<'_>) -> Result<()> {
        Ok(())
    }

    /// Whether the engine binds the result under the node's result id.
    /// Tags that publish on their own return false.
    fn publishes_result(&self) -> bool {
        true
    }

    /// Declared configuration with a value, for diagnostics
    fn fields(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Conditional execution: run only when `expr` is truthy, or falsy if negated
#[derive(Debug, Clone)]
pub struct Guard {
    pub expr: Arc<dyn Expression>,
    pub negated: bool,
}

impl Guard {
    pub fn allows(&self, scope: ScopeView<'_>) -> Result<bool> {
        Ok(self.expr.evaluate_bool(scope)? != self.negated)
    }
}

/// Where an instruction's result is published
#[derive(Debug, Clone)]
pub struct ResultBinding {
    pub expr: Arc<dyn Expression>,
    /// Attribute the binding came from
    pub attribute: String,
    /// Whether the attribute was namespace-qualified
    pub qualified: bool,
}

impl ResultBinding {
    pub fn key(&self, scope: ScopeView<'_>) -> Result<String> {
        match self.expr.evaluate_string(scope)? {
            Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => bail!(
                "Result id '{}' evaluated to an empty name",
                self.expr.source()
            ),
        }
    }
}

/// One node of the instruction tree
#[derive(Debug)]
pub struct Instruction {
    pub id: NodeId,
    pub tag_name: String,
    pub line: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: TagKind,
    pub guard: Option<Guard>,
    pub binding: Option<ResultBinding>,
    pub tag: Arc<dyn Tag>,
}

#[derive(Debug, Default)]
pub struct InstructionTree {
    nodes: Vec<Instruction>,
}

impl InstructionTree {
    pub(crate) fn new(nodes: Vec<Instruction>) -> Self {
        Self { nodes }
    }

    pub fn root(&self) -> &Instruction {
        &self.nodes[NodeId::ROOT.0]
    }

    pub fn node(&self, id: NodeId) -> &Instruction {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order walk with depth
    pub fn walk(&self) -> Vec<(usize, &Instruction)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![(0usize, NodeId::ROOT)];
        while let Some((depth, id)) = stack.pop() {
            let node = self.node(id);
            out.push((depth, node));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, *child));
            }
        }
        out
    }
}

/// A parsed resource
pub struct Entity {
    key: EntityKey,
    resource: ResourceRef,
    root_tag: String,
    timestamp: Option<DateTime<Utc>>,
    cacheable: bool,
    tree: OnceLock<InstructionTree>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("key", &self.key)
            .field("resource", &self.resource.path())
            .field("root_tag", &self.root_tag)
            .field("timestamp", &self.timestamp)
            .field("complete", &self.tree.get().is_some())
            .finish()
    }
}

impl Entity {
    pub(crate) fn new(resource: ResourceRef, root_tag: &str, timestamp: Option<DateTime<Utc>>) -> Self {
        let cacheable = resource.cacheable();
        Self {
            key: EntityKey(NEXT_ENTITY_KEY.fetch_add(1, Ordering::Relaxed)),
            resource,
            root_tag: root_tag.to_string(),
            timestamp,
            cacheable,
            tree: OnceLock::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn name(&self) -> String {
        self.resource.name()
    }

    pub fn root_tag(&self) -> &str {
        &self.root_tag
    }

    /// Resource modification time captured when parsing started
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Instruction tree, absent while the entity is still being parsed
    pub fn tree(&self) -> Option<&InstructionTree> {
        self.tree.get()
    }

    pub(crate) fn complete(&self, tree: InstructionTree) {
        let _ = self.tree.set(tree);
    }

    /// Whether the resource changed since this entity was parsed.
    /// A resource that no longer exists counts as changed.
    pub fn is_modified(&self) -> bool {
        if !self.resource.exists() {
            return true;
        }
        self.resource.modified() != self.timestamp
    }
}

/// Shared handle to a parsed entity
pub type EntityRef = Arc<Entity>;

pub use aggregate::{aggregate, ConstNode};
pub use registry::{EntityFactory, Registry, TagFactory, TagLibrary};
pub use schema::{Bean, BeanTag, Field, FieldKind, Fields};
