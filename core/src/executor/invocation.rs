//! Per-chain execution state

use indexmap::IndexMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::scope::{ScopeId, Scopes};
use crate::tag::{EntityRef, Instruction, NodeId};
use crate::values::Val;

/// Cooperative "abort everything" flag of one invocation chain.
/// Clones share the flag, so another thread can request the abort.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something a tag opened during a call that must be released when the
/// entity exits
pub trait Closeable: Send {
    fn name(&self) -> &str;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct StackFrame {
    pub entity: EntityRef,
    pub node: NodeId,
}

impl StackFrame {
    pub fn instruction(&self) -> Option<&Instruction> {
        self.entity.tree().map(|tree| tree.node(self.node))
    }

    /// `<tag> line N of 'name'`
    pub fn describe(&self) -> String {
        match self.instruction() {
            Some(node) => format!("<{}> line {} of '{}'", node.tag_name, node.line, self.entity.name()),
            None => format!("'{}'", self.entity.name()),
        }
    }
}

/// Where the first failure of a chain happened
#[derive(Debug, Clone)]
pub struct ErrorOrigin {
    /// Sequence id of the failing scope
    pub scope: u64,
    pub resource: String,
    pub tag: String,
    pub line: usize,
    /// Consts visible from the failing scope at the time of failure
    pub consts: IndexMap<String, Val>,
}

/// State of one invocation chain: scopes, stack, signals and results
pub struct Invocation {
    process_id: Uuid,
    pub(crate) scopes: Scopes,
    pub(crate) stack: Vec<StackFrame>,
    abort: AbortHandle,
    result: Option<Val>,
    closeables: Vec<Box<dyn Closeable>>,
    error_origin: Option<ErrorOrigin>,
}

impl Invocation {
    /// New chain whose process root holds `properties`
    pub fn new(properties: &IndexMap<String, String>) -> Self {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        for (key, value) in properties {
            scopes.replace(root, key, Some("property"), Val::from(value.as_str()));
        }
        Self {
            process_id: Uuid::new_v4(),
            scopes,
            stack: Vec::new(),
            abort: AbortHandle::default(),
            result: None,
            closeables: Vec::new(),
            error_origin: None,
        }
    }

    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn scopes_mut(&mut self) -> &mut Scopes {
        &mut self.scopes
    }

    /* ===================== Abort ===================== */

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_aborting(&self) -> bool {
        self.abort.is_aborted()
    }

    /* ===================== Invocation result ===================== */

    pub fn result(&self) -> Option<&Val> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, value: Option<Val>) -> Option<Val> {
        std::mem::replace(&mut self.result, value)
    }

    pub fn take_result(&mut self) -> Option<Val> {
        self.result.take()
    }

    /* ===================== Closeables ===================== */

    pub fn register_closeable(&mut self, closeable: Box<dyn Closeable>) {
        self.closeables.push(closeable);
    }

    pub fn open_closeables(&self) -> usize {
        self.closeables.len()
    }

    /// Flush and close everything registered after the first `mark`
    /// closeables, latest first, ignoring failures
    pub fn close_since(&mut self, mark: usize) {
        let mark = mark.min(self.closeables.len());
        for mut closeable in self.closeables.drain(mark..).rev() {
            if let Err(e) = closeable.flush() {
                debug!(name = closeable.name(), error = %e, "Flush failed");
            }
            if let Err(e) = closeable.close() {
                debug!(name = closeable.name(), error = %e, "Close failed");
            }
        }
    }

    /* ===================== Diagnostics ===================== */

    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    /// Executing instructions, innermost first
    pub fn call_trace(&self) -> Vec<String> {
        self.stack.iter().rev().map(StackFrame::describe).collect()
    }

    pub fn error_origin(&self) -> Option<&ErrorOrigin> {
        self.error_origin.as_ref()
    }

    /// Remember where a failure started; later calls keep the first origin
    pub(crate) fn record_error_origin(&mut self, scope: ScopeId, entity: &EntityRef, node: &Instruction) {
        if self.error_origin.is_some() {
            return;
        }
        self.error_origin = Some(ErrorOrigin {
            scope: self.scopes.seq(scope),
            resource: entity.resource().path().to_string(),
            tag: node.tag_name.clone(),
            line: node.line,
            consts: self.scopes.visible_consts(scope),
        });
    }
}
