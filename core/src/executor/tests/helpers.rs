//! Test helpers for engine tests
//!
//! Engines over in-memory resources, plus a small tag library whose beans
//! record what they were called with.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::EngineError;
use crate::executor::{Call, Closeable, Engine, ExecutionListener, Invocation, Outcome};
use crate::init::EngineBuilder;
use crate::scope::{ScopeId, ScopeView};
use crate::stdlib::BeanFactory;
use crate::tag::registry::TagLibrary;
use crate::tag::{Bean, Entity, Field, FieldKind, Fields, Instruction};
use crate::values::Val;

pub const TEST_NS: &str = "urn:tagflow:test";

/// Engine over the given `(name, xml)` resources, with the test library
pub fn build_engine(sources: &[(&str, &str)]) -> (Engine, Probes) {
    build_engine_with(sources, Settings::default(), None)
}

pub fn build_engine_with(
    sources: &[(&str, &str)],
    settings: Settings,
    listener: Option<Arc<dyn ExecutionListener>>,
) -> (Engine, Probes) {
    let probes = Probes::default();
    let mut builder = EngineBuilder::from_settings(settings).library(probes.library());
    for (name, xml) in sources {
        builder = builder.source(name, xml);
    }
    if let Some(listener) = listener {
        builder = builder.listener(listener);
    }
    (builder.build().expect("Engine build failed"), probes)
}

/// Parse `source` as resource `main` and run it with `params`
pub fn parse_and_run(source: &str, params: HashMap<String, Val>) -> Result<Option<Val>, EngineError> {
    let (engine, _) = build_engine(&[("main", source)]);
    engine.run("main", params)
}

/// Run `name` in a scope that outlives the call, so that its bindings can
/// be inspected afterwards
pub fn run_kept(engine: &Engine, name: &str, overwrite: bool) -> (Invocation, ScopeId, Result<Outcome, EngineError>) {
    let entity = engine.parser().load(name).expect("Load failed");
    let mut inv = engine.invocation();
    let root = inv.scopes().root();
    let scope = inv.scopes_mut().enter(root);
    inv.scopes_mut().set_overwrite_allowed(scope, overwrite);
    let result = engine.run_entity(&mut inv, &entity, scope);
    (inv, scope, result)
}

pub fn list(items: &[Val]) -> Val {
    Val::list(items.to_vec())
}

/* ===================== Test library ===================== */

/// Shared state observed by the test beans
#[derive(Debug, Clone, Default)]
pub struct Probes {
    pub seen: Arc<Mutex<Vec<Fields>>>,
    pub closed: Arc<AtomicUsize>,
}

impl Probes {
    pub fn library(&self) -> TagLibrary {
        TagLibrary::new("test", TEST_NS)
            .tag("record", BeanFactory::new(RecordBean { seen: self.seen.clone() }))
            .tag("fail", BeanFactory::new(FailBean))
            .tag("closer", BeanFactory::new(CloserBean { closed: self.closed.clone() }))
            .tag("spin", BeanFactory::new(SpinBean))
    }

    /// `name` of every recorded call, in order
    pub fn names(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.str("name").unwrap_or_default().to_string())
            .collect()
    }

    pub fn calls(&self) -> Vec<Fields> {
        self.seen.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// A closeable counted like the ones `<closer>` registers
    pub fn closeable(&self) -> Box<dyn Closeable> {
        Box::new(Counted(self.closed.clone()))
    }
}

static RECORD_FIELDS: &[Field] = &[
    Field::new("name", FieldKind::Text).required(),
    Field::new("count", FieldKind::Integer),
    Field::new("loud", FieldKind::Bool),
];

/// Records its fields and returns `name`
#[derive(Debug, Clone)]
pub struct RecordBean {
    seen: Arc<Mutex<Vec<Fields>>>,
}

impl Bean for RecordBean {
    fn type_name(&self) -> &'static str {
        "record"
    }

    fn fields(&self) -> &'static [Field] {
        RECORD_FIELDS
    }

    fn baseline(&self) -> Fields {
        Fields::new().with("count", 1).with("loud", false)
    }

    fn invoke(&self, _call: &mut Call<'_>, fields: &Fields) -> Result<Option<Val>> {
        self.seen.lock().unwrap().push(fields.clone());
        Ok(fields.get("name").cloned())
    }
}

static FAIL_FIELDS: &[Field] = &[Field::new("message", FieldKind::Text)];

#[derive(Debug, Clone)]
pub struct FailBean;

impl Bean for FailBean {
    fn type_name(&self) -> &'static str {
        "fail"
    }

    fn fields(&self) -> &'static [Field] {
        FAIL_FIELDS
    }

    fn invoke(&self, _call: &mut Call<'_>, fields: &Fields) -> Result<Option<Val>> {
        bail!("{}", fields.str("message").unwrap_or("boom"))
    }
}

/// Registers a closeable that counts its own closing
#[derive(Debug, Clone)]
pub struct CloserBean {
    closed: Arc<AtomicUsize>,
}

struct Counted(Arc<AtomicUsize>);

impl Closeable for Counted {
    fn name(&self) -> &str {
        "counted"
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::Other, "close errors are ignored"))
    }
}

impl Bean for CloserBean {
    fn type_name(&self) -> &'static str {
        "closer"
    }

    fn fields(&self) -> &'static [Field] {
        &[]
    }

    fn invoke(&self, call: &mut Call<'_>, _fields: &Fields) -> Result<Option<Val>> {
        call.invocation().register_closeable(Box::new(Counted(self.closed.clone())));
        Ok(None)
    }
}

/// Waits until the chain is aborted
#[derive(Debug, Clone)]
pub struct SpinBean;

impl Bean for SpinBean {
    fn type_name(&self) -> &'static str {
        "spin"
    }

    fn fields(&self) -> &'static [Field] {
        &[]
    }

    fn invoke(&self, call: &mut Call<'_>, _fields: &Fields) -> Result<Option<Val>> {
        let start = Instant::now();
        while !call.invocation().is_aborting() {
            if start.elapsed() > Duration::from_secs(5) {
                bail!("never aborted");
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(None)
    }
}

/* ===================== Listener ===================== */

/// Records every listener event as a line
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecutionListener for Recorder {
    fn on_process_start(&self, _process: uuid::Uuid, _scope: ScopeView<'_>) {
        self.push("process start".to_string());
    }

    fn on_process_end(&self, _process: uuid::Uuid, _scope: ScopeView<'_>) {
        self.push("process end".to_string());
    }

    fn on_entity_entry(&self, entity: &Entity, _scope: ScopeView<'_>) {
        self.push(format!("enter '{}'", entity.name()));
    }

    fn on_entity_exit(&self, entity: &Entity, _scope: ScopeView<'_>) {
        self.push(format!("exit '{}'", entity.name()));
    }

    fn on_tag_entry(&self, _entity: &Entity, node: &Instruction, _scope: ScopeView<'_>) {
        self.push(format!("enter <{}>", node.tag_name));
    }

    fn on_tag_exit(&self, _entity: &Entity, node: &Instruction, _scope: ScopeView<'_>) {
        self.push(format!("exit <{}>", node.tag_name));
    }
}
