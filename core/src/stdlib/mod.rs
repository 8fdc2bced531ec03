//! Built-in tag library
//!
//! Everything a scenario can use without registering anything: data tags,
//! expressions, resource invocation, control tags and a few bean tags.

pub mod beans;
pub mod control;
pub mod data;
pub mod invoke;
pub mod scenario;

use crate::parser::EXPRESSION_TAG;
use crate::tag::registry::{ns, Registry, TagLibrary};

pub use beans::{ExitBean, LogBean, ReturnBean};
pub use control::{ElseFactory, IfFactory, MutexFactory};
pub use data::{DataFactory, LiteralFactory};
pub use invoke::{BeanFactory, ExpressionFactory, InvokeFactory};
pub use scenario::ScenarioFactory;

/// Name of the built-in library
pub const LIBRARY_NAME: &str = "builtin";

/// Root tag of a scenario resource
pub const SCENARIO_TAG: &str = "scenario";

/* ===================== Library ===================== */

/// The built-in tags, in the framework namespace
pub fn library() -> TagLibrary {
    TagLibrary::new(LIBRARY_NAME, ns::ROOT)
        .tag("data", DataFactory::new())
        .tag("const", DataFactory::new())
        .tag("default", DataFactory::default_only())
        .tag("literal", LiteralFactory)
        .tag(EXPRESSION_TAG, ExpressionFactory)
        .tag("if", IfFactory)
        .tag("else", ElseFactory)
        .tag("mutex", MutexFactory)
        .tag("log", BeanFactory::new(LogBean))
        .tag("return", BeanFactory::new(ReturnBean))
        .tag("exit", BeanFactory::new(ExitBean))
}

/// Registry with the built-in library and the `scenario` root
pub fn registry() -> Registry {
    let mut registry = Registry::new(DataFactory::new(), InvokeFactory);
    registry.add_library(library());
    registry.add_root(SCENARIO_TAG, ScenarioFactory);
    registry
}
