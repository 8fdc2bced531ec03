//! Execution engine
//!
//! Walks an entity's instruction tree depth first. For every node:
//!
//! 1. skip it if the chain is aborting or its entity is returning;
//! 2. push it on the execution stack and notify listeners;
//! 3. evaluate the guard, running the "not executed" hook if it rejects;
//! 4. run the tag and publish its result under the node's result id;
//! 5. pop the stack and notify listeners, on every path.
//!
//! Action failures are attributed to the node they happened in, once.
//! Abort and return travel as [`Signal`]s next to each node's output.

mod invocation;
mod listener;
mod outcome;

use std::sync::Arc;
use tracing::error;

use crate::config::Settings;
use crate::error::{EngineError, ParseError, RuntimeError};
use crate::parser::Parser;
use crate::scope::{ScopeId, ScopeView, Scopes};
use crate::tag::{EntityRef, Instruction, InstructionTree, NodeId, ResultBinding};
use crate::values::Val;

pub use invocation::{AbortHandle, Closeable, ErrorOrigin, Invocation, StackFrame};
pub use listener::ExecutionListener;
pub use outcome::{Children, Outcome, Output, Signal};

pub struct Engine {
    parser: Parser,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    settings: Settings,
}

impl Engine {
    pub fn new(parser: Parser, settings: Settings) -> Self {
        Self {
            parser,
            listeners: Vec::new(),
            settings,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.push(listener);
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fresh invocation chain seeded with the configured properties
    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.settings.properties)
    }

    /// Run the entity registered under `name` in a new chain
    pub fn run<I, K>(&self, name: &str, params: I) -> Result<Option<Val>, EngineError>
    where
        I: IntoIterator<Item = (K, Val)>,
        K: AsRef<str>,
    {
        let mut inv = self.invocation();
        self.run_in(&mut inv, name, params)
    }

    /// Run the entity registered under `name` in an existing chain, with
    /// `params` bound in the entity's scope
    pub fn run_in<I, K>(&self, inv: &mut Invocation, name: &str, params: I) -> Result<Option<Val>, EngineError>
    where
        I: IntoIterator<Item = (K, Val)>,
        K: AsRef<str>,
    {
        let entity = self.parser.load(name)?;
        let root = inv.scopes.root();
        for listener in &self.listeners {
            listener.on_process_start(inv.process_id(), inv.scopes.view(root));
        }

        let scope = inv.scopes.enter(root);
        for (key, value) in params {
            inv.scopes.set(scope, key.as_ref(), None, value, false)?;
        }
        let result = self.run_entity(inv, &entity, scope);
        inv.scopes.leave(scope);

        for listener in &self.listeners {
            listener.on_process_end(inv.process_id(), inv.scopes.view(root));
        }
        Ok(result?.output.to_val())
    }

    /// Run `entity` with `scope` as its own scope.
    ///
    /// Closeables registered during the call are released on exit,
    /// whatever the outcome. A return inside the entity ends here.
    pub fn run_entity(&self, inv: &mut Invocation, entity: &EntityRef, scope: ScopeId) -> Result<Outcome, EngineError> {
        inv.scopes.bind_entity(scope, entity.key());
        let mark = inv.open_closeables();
        for listener in &self.listeners {
            listener.on_entity_entry(entity, inv.scopes.view(scope));
        }

        let result = self.execute(inv, entity, NodeId::ROOT, scope);

        inv.close_since(mark);
        for listener in &self.listeners {
            listener.on_entity_exit(entity, inv.scopes.view(scope));
        }

        let mut outcome = result?;
        if outcome.signal == Signal::Return {
            outcome.signal = Signal::None;
        }
        Ok(outcome)
    }

    /// Execute one node of `entity` against `scope`
    pub(crate) fn execute(
        &self,
        inv: &mut Invocation,
        entity: &EntityRef,
        node: NodeId,
        scope: ScopeId,
    ) -> Result<Outcome, EngineError> {
        if inv.is_aborting() {
            return Ok(Outcome::signal(Signal::Abort));
        }
        if !inv.stack.is_empty() && entity_returning(&inv.scopes, entity, scope) {
            return Ok(Outcome::signal(Signal::Return));
        }
        let tree = entity
            .tree()
            .ok_or_else(|| ParseError::NotExecutable(entity.resource().path().to_string()))?;
        let instruction = tree.node(node);

        inv.stack.push(StackFrame {
            entity: entity.clone(),
            node,
        });
        for listener in &self.listeners {
            listener.on_tag_entry(entity, instruction, inv.scopes.view(scope));
        }

        let result = self
            .execute_node(inv, entity, tree, instruction, scope)
            .map_err(|err| self.attribute(inv, entity, instruction, scope, err));

        inv.stack.pop();
        for listener in &self.listeners {
            listener.on_tag_exit(entity, instruction, inv.scopes.view(scope));
        }
        result
    }

    fn execute_node(
        &self,
        inv: &mut Invocation,
        entity: &EntityRef,
        tree: &InstructionTree,
        instruction: &Instruction,
        scope: ScopeId,
    ) -> Result<Outcome, EngineError> {
        let mut call = Call {
            engine: self,
            inv,
            entity,
            tree,
            node: instruction.id,
            scope,
        };
        let tag = &instruction.tag;

        if let Some(guard) = &instruction.guard {
            if !guard.allows(call.view())? {
                tag.on_not_executed(&mut call)?;
                return Ok(Outcome::absent());
            }
        }

        let outcome = tag.execute(&mut call)?;
        if let Some(binding) = &instruction.binding {
            if tag.publishes_result() && outcome.signal != Signal::Abort {
                call.publish(binding, outcome.output.to_val())?;
            }
        }
        Ok(outcome)
    }

    /// Turn a raw action failure into a runtime error of `node`
    fn attribute(
        &self,
        inv: &mut Invocation,
        entity: &EntityRef,
        node: &Instruction,
        scope: ScopeId,
        err: EngineError,
    ) -> EngineError {
        inv.record_error_origin(scope, entity, node);
        match err {
            EngineError::Action(source) => {
                let message = format!("{:#}", source);
                error!(
                    tag = %node.tag_name,
                    line = node.line,
                    resource = %entity.resource(),
                    "Action failed: {}",
                    message
                );
                EngineError::Runtime(RuntimeError {
                    tag: node.tag_name.clone(),
                    line: node.line,
                    resource: entity.resource().path().to_string(),
                    scope: inv.scopes.seq(scope),
                    trace: inv.call_trace(),
                    message,
                    source: source.into(),
                })
            }
            other => other,
        }
    }
}

fn entity_returning(scopes: &Scopes, entity: &EntityRef, scope: ScopeId) -> bool {
    scopes
        .find_entity_scope(scope, entity.key())
        .is_some_and(|s| scopes.returning(s))
}

/// One node's view of the running chain, handed to [`crate::tag::Tag`]s
pub struct Call<'a> {
    engine: &'a Engine,
    inv: &'a mut Invocation,
    entity: &'a EntityRef,
    tree: &'a InstructionTree,
    node: NodeId,
    scope: ScopeId,
}

impl<'a> Call<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn entity(&self) -> &'a EntityRef {
        self.entity
    }

    pub fn instruction(&self) -> &'a Instruction {
        self.tree.node(self.node)
    }

    /// Scope the node runs against
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn scopes(&self) -> &Scopes {
        &self.inv.scopes
    }

    pub fn scopes_mut(&mut self) -> &mut Scopes {
        &mut self.inv.scopes
    }

    pub fn invocation(&mut self) -> &mut Invocation {
        &mut *self.inv
    }

    pub fn view(&self) -> ScopeView<'_> {
        self.inv.scopes.view(self.scope)
    }

    /// The same node running against another scope
    pub fn in_scope(&mut self, scope: ScopeId) -> Call<'_> {
        Call {
            engine: self.engine,
            inv: &mut *self.inv,
            entity: self.entity,
            tree: self.tree,
            node: self.node,
            scope,
        }
    }

    pub fn view_of(&self, scope: ScopeId) -> ScopeView<'_> {
        self.inv.scopes.view(scope)
    }

    /// Scope of the entity this node belongs to
    pub fn entity_scope(&self) -> ScopeId {
        self.inv
            .scopes
            .find_entity_scope(self.scope, self.entity.key())
            .unwrap_or(self.scope)
    }

    /// Run the node's children in order against `scope`, stopping at the
    /// first abort or return
    pub fn run_children(&mut self, scope: ScopeId) -> Result<Children, EngineError> {
        let mut children = Children::default();
        for &child in &self.instruction().children {
            let outcome = self.engine.execute(self.inv, self.entity, child, scope)?;
            children.results.push(outcome.output);
            if !outcome.signal.is_none() {
                children.signal = outcome.signal;
                break;
            }
        }
        Ok(children)
    }

    /// Run `f` with a fresh child scope of the current one, dropped afterwards
    pub fn with_child_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self, ScopeId) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let child = self.inv.scopes.enter(self.scope);
        let result = f(self, child);
        self.inv.scopes.leave(child);
        result
    }

    /// Invoke another entity with `scope` as its scope
    pub fn invoke_entity(&mut self, entity: &EntityRef, scope: ScopeId) -> Result<Outcome, EngineError> {
        self.engine.run_entity(self.inv, entity, scope)
    }

    /// Bind `value` under the binding's key in the entity's scope,
    /// conflict-checked unless the scope allows overwriting
    pub fn publish(&mut self, binding: &ResultBinding, value: Option<Val>) -> Result<(), EngineError> {
        let overwrite = self.inv.scopes.overwrite_allowed(self.entity_scope());
        self.bind_result(binding, value, !overwrite)
    }

    pub fn bind_result(
        &mut self,
        binding: &ResultBinding,
        value: Option<Val>,
        check_conflict: bool,
    ) -> Result<(), EngineError> {
        let key = binding.key(self.view())?;
        let target = self.entity_scope();
        let origin = self.instruction().tag_name.as_str();
        self.inv
            .scopes
            .set(target, &key, Some(origin), value.unwrap_or(Val::Null), check_conflict)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
