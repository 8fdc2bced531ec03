//! Element tree → instruction tree

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use super::xml::{Element, Node};
use super::Parser;
use crate::error::ParseError;
use crate::expr::Expression;
use crate::tag::registry::{ns, EntityFactory, TagAttrs};
use crate::tag::{EntityRef, Guard, Instruction, InstructionTree, NodeId, ResultBinding, TagKind};
use crate::resource::ResourceRef;

/// Tag name of the synthetic tags free text turns into
pub const EXPRESSION_TAG: &str = "expression";

/// What a factory can see and do while building one tag
pub struct FactoryCx<'b> {
    parser: &'b Parser,
    resource: &'b ResourceRef,
    nodes: &'b [Instruction],
    parent: Option<NodeId>,
    target: Option<ResourceRef>,
    in_progress: &'b mut Vec<EntityRef>,
}

impl<'b> FactoryCx<'b> {
    pub fn parser(&self) -> &'b Parser {
        self.parser
    }

    /// Resource being parsed
    pub fn resource(&self) -> &ResourceRef {
        self.resource
    }

    /// Resource the element was resolved to, for invocations
    pub fn target(&self) -> Option<&ResourceRef> {
        self.target.as_ref()
    }

    pub fn compile(&self, source: &str) -> Result<Arc<dyn Expression>> {
        self.parser
            .evaluator()
            .compile(source)
            .with_context(|| format!("Invalid expression '{}'", source))
    }

    /// Kind of the nearest ancestor that is not a transparent control tag
    pub fn enclosing_kind(&self) -> Option<TagKind> {
        let mut current = self.parent;
        while let Some(id) = current {
            let node = &self.nodes[id.0];
            if node.kind != TagKind::Control {
                return Some(node.kind);
            }
            current = node.parent;
        }
        None
    }

    /// Sibling built right before the element being created
    pub fn previous_sibling(&self) -> Option<&Instruction> {
        let parent = &self.nodes[self.parent?.0];
        parent.children.last().map(|id| &self.nodes[id.0])
    }

    /// Kind of tag `el` would become
    pub fn classify(&self, el: &Element) -> Result<TagKind> {
        let resolved = self
            .parser
            .registry()
            .resolve(self.parser.locator(), el.ns.as_deref(), &el.local)?;
        Ok(resolved.factory.kind())
    }

    /// Parse the target resource with the current parse stack, so that
    /// references back into resources being parsed resolve to them
    pub fn parse_target(&mut self) -> Result<Option<EntityRef>> {
        let Some(target) = self.target.clone() else {
            return Ok(None);
        };
        Ok(self.parser.parse_in(&target, false, self.in_progress)?)
    }
}

pub(crate) struct TreeBuilder<'b> {
    parser: &'b Parser,
    entity: &'b EntityRef,
    nodes: Vec<Instruction>,
    /// Elements being built, innermost last
    trail: Vec<(String, usize)>,
    in_progress: &'b mut Vec<EntityRef>,
}

impl<'b> TreeBuilder<'b> {
    pub(crate) fn new(parser: &'b Parser, entity: &'b EntityRef, in_progress: &'b mut Vec<EntityRef>) -> Self {
        Self {
            parser,
            entity,
            nodes: Vec::new(),
            trail: Vec::new(),
            in_progress,
        }
    }

    pub(crate) fn build(mut self, root: &mut Element, factory: &dyn EntityFactory) -> Result<InstructionTree, ParseError> {
        match self.build_root(root, factory) {
            Ok(()) => Ok(InstructionTree::new(self.nodes)),
            Err(err) => Err(self.rewrap(err)),
        }
    }

    /// Errors from nested resources already carry their location
    fn rewrap(&self, err: anyhow::Error) -> ParseError {
        match err.downcast::<ParseError>() {
            Ok(parse) => parse,
            Err(err) => {
                let (tag, line) = self.trail.last().cloned().unwrap_or_default();
                ParseError::Tag {
                    tag,
                    line,
                    resource: self.entity.resource().path().to_string(),
                    message: format!("{:#}", err),
                }
            }
        }
    }

    fn cx(&mut self, parent: Option<NodeId>, target: Option<ResourceRef>) -> FactoryCx<'_> {
        FactoryCx {
            parser: self.parser,
            resource: self.entity.resource(),
            nodes: &self.nodes,
            parent,
            target,
            in_progress: &mut *self.in_progress,
        }
    }

    fn build_root(&mut self, root: &mut Element, factory: &dyn EntityFactory) -> Result<()> {
        self.trail.push((root.local.clone(), root.line));
        let tag = {
            let mut cx = self.cx(None, None);
            factory.create(root, &mut cx)?
        };
        root.map_text(expression_element);
        self.nodes.push(Instruction {
            id: NodeId::ROOT,
            tag_name: root.local.clone(),
            line: root.line,
            parent: None,
            children: Vec::new(),
            kind: TagKind::Entity,
            guard: None,
            binding: None,
            tag,
        });
        self.build_children(root, NodeId::ROOT)?;
        self.trail.pop();
        Ok(())
    }

    fn build_children(&mut self, el: &mut Element, parent: NodeId) -> Result<()> {
        for child in el.elements_mut() {
            self.build_element(child, parent)?;
        }
        Ok(())
    }

    fn build_element(&mut self, el: &mut Element, parent: NodeId) -> Result<()> {
        self.trail.push((el.local.clone(), el.line));

        let resolved = self
            .parser
            .registry()
            .resolve(self.parser.locator(), el.ns.as_deref(), &el.local)?;
        let factory = resolved.factory;
        let attrs = factory.attrs();
        let binding = self.binding(el, attrs)?;
        let guard = self.guard(el, attrs)?;
        if !factory.keeps_text() {
            el.map_text(expression_element);
        }

        let created = {
            let mut cx = self.cx(Some(parent), resolved.target);
            factory.create(el, &mut cx)?
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(Instruction {
            id,
            tag_name: el.local.clone(),
            line: el.line,
            parent: Some(parent),
            children: Vec::new(),
            kind: factory.kind(),
            guard,
            binding,
            tag: created.tag,
        });
        self.nodes[parent.0].children.push(id);

        if !created.children_parsed {
            self.build_children(el, id)?;
        }
        self.trail.pop();
        Ok(())
    }

    /// Result binding: the framework-qualified attribute wins over the plain one
    fn binding(&self, el: &Element, attrs: TagAttrs) -> Result<Option<ResultBinding>> {
        let Some(name) = attrs.id else {
            return Ok(None);
        };
        let (source, qualified) = match (el.attr_ns(ns::ROOT, name), el.attr(name)) {
            (Some(source), _) => (source, true),
            (None, Some(source)) => (source, false),
            (None, None) => return Ok(None),
        };
        if source.trim().is_empty() {
            bail!("Attribute '{}' must not be blank", name);
        }
        Ok(Some(ResultBinding {
            expr: self.compile(source)?,
            attribute: name.to_string(),
            qualified,
        }))
    }

    fn guard(&self, el: &Element, attrs: TagAttrs) -> Result<Option<Guard>> {
        let positive = attrs.guard.and_then(|a| el.attr(a).map(|v| (a, v)));
        let negative = attrs.negated_guard.and_then(|a| el.attr(a).map(|v| (a, v)));
        match (positive, negative) {
            (Some((a, _)), Some((b, _))) => {
                bail!("Attributes '{}' and '{}' cannot be used together", a, b)
            }
            (Some((_, source)), None) => Ok(Some(Guard {
                expr: self.compile(source)?,
                negated: false,
            })),
            (None, Some((_, source))) => Ok(Some(Guard {
                expr: self.compile(source)?,
                negated: true,
            })),
            (None, None) => Ok(None),
        }
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>> {
        self.parser
            .evaluator()
            .compile(source)
            .with_context(|| format!("Invalid expression '{}'", source))
    }
}

fn expression_element(text: &str, line: usize) -> Element {
    let mut el = Element::new(Some(ns::COMMAND), EXPRESSION_TAG, line);
    el.children.push(Node::Text {
        text: text.to_string(),
        line,
    });
    el
}
