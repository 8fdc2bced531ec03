//! `<scenario>` root tag

use anyhow::Result;
use std::sync::Arc;

use crate::error::EngineError;
use crate::executor::{Call, Outcome, Output};
use crate::parser::{Element, FactoryCx};
use crate::tag::{EntityFactory, Tag};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScenarioFactory;

impl EntityFactory for ScenarioFactory {
    fn create(&self, _root: &mut Element, _cx: &mut FactoryCx<'_>) -> Result<Arc<dyn Tag>> {
        Ok(Arc::new(ScenarioTag))
    }
}

/// Runs its children in the entity scope. The entity's result is whatever
/// `return` left in the invocation result slot.
#[derive(Debug)]
pub struct ScenarioTag;

impl Tag for ScenarioTag {
    fn type_name(&self) -> &'static str {
        "scenario"
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        let scope = call.scope();
        let children = call.run_children(scope)?;
        let result = call.invocation().take_result();
        Ok(Outcome::new(Output::from_option(result), children.signal))
    }
}
