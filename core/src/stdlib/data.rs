//! Data tags and `<literal>`
//!
//! A data tag aggregates its children's results and binds the value. Where
//! it binds is fixed at parse time by its position:
//!
//! - **local**: directly under the entity root. Bound under its `id` in the
//!   entity scope.
//! - **sub**: under another data tag. Handed to the parent as a named item.
//! - **parameter**: anywhere else, typically under an invoker. Evaluated
//!   against the entity scope and bound under the tag's own name in the
//!   scope it runs in. It takes no `id`.
//!
//! Transparent control tags in between do not count.

use anyhow::{bail, Result};

use super::invoke::push_down_attributes;
use crate::error::EngineError;
use crate::executor::{Call, Outcome, Output, Signal};
use crate::parser::{Element, FactoryCx};
use crate::tag::aggregate::{aggregate, ConstNode};
use crate::tag::registry::{ns, Created, TagAttrs, TagFactory};
use crate::tag::{Tag, TagKind};
use crate::values::Val;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Local,
    Sub,
    Parameter,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataFactory {
    default_only: bool,
}

impl DataFactory {
    pub fn new() -> Self {
        Self { default_only: false }
    }

    /// `<default>`: binds only when the id has no non-empty value yet
    pub fn default_only() -> Self {
        Self { default_only: true }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.contains('.') {
        bail!("Data tag name should not contain dots: <{}>", name);
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        bail!("Data tag name should not start with a number: <{}>", name);
    }
    Ok(())
}

impl TagFactory for DataFactory {
    fn kind(&self) -> TagKind {
        TagKind::Data
    }

    fn attrs(&self) -> TagAttrs {
        TagAttrs::ID_ONLY
    }

    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created> {
        validate_name(&el.local)?;

        let mode = match cx.enclosing_kind() {
            Some(TagKind::Entity) => DataMode::Local,
            Some(TagKind::Data) => DataMode::Sub,
            _ => DataMode::Parameter,
        };
        let has_id = el.attr("id").is_some() || el.attr_ns(ns::ROOT, "id").is_some();
        match mode {
            DataMode::Local if !has_id => {
                bail!("Local data tag <{}> needs an id attribute", el.local)
            }
            DataMode::Sub | DataMode::Parameter if self.default_only => {
                bail!("<{}> is only allowed directly under the entity root", el.local)
            }
            DataMode::Parameter if has_id => {
                bail!("Parameter data tag <{}> cannot carry an id attribute", el.local)
            }
            _ => {}
        }

        push_down_attributes(el, |name| mode == DataMode::Sub || name != "id");

        Ok(Created::new(DataTag {
            name: el.local.clone(),
            mode,
            default_only: self.default_only,
        }))
    }
}

/// Aggregating data tag, see the module docs
#[derive(Debug)]
pub struct DataTag {
    name: String,
    mode: DataMode,
    default_only: bool,
}

impl DataTag {
    pub fn mode(&self) -> DataMode {
        self.mode
    }

    /// A non-empty value is already visible under the binding key
    fn already_bound(&self, call: &Call<'_>) -> Result<bool> {
        let Some(binding) = &call.instruction().binding else {
            return Ok(false);
        };
        let key = binding.key(call.view())?;
        Ok(call
            .scopes()
            .get(call.scope(), &key, true)
            .is_some_and(|v| !v.is_empty()))
    }
}

impl Tag for DataTag {
    fn type_name(&self) -> &'static str {
        if self.default_only {
            "default"
        } else {
            "data"
        }
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        if self.default_only && self.already_bound(call)? {
            return Ok(Outcome::absent());
        }

        // Parameters see the entity's values, not their sibling parameters
        let scope = call.scope();
        let source = match self.mode {
            DataMode::Parameter => call.entity_scope(),
            _ => scope,
        };
        let children = call.run_children(source)?;
        if children.signal == Signal::Abort {
            return Ok(Outcome::signal(Signal::Abort));
        }
        let signal = children.signal;
        let value = aggregate(children.results);

        match self.mode {
            DataMode::Sub => {
                let node = ConstNode {
                    name: self.name.clone(),
                    value,
                };
                return Ok(Outcome::new(Output::Named(node), signal));
            }
            DataMode::Parameter => {
                let stored = value.clone().unwrap_or(Val::Null);
                call.scopes_mut().set(scope, &self.name, Some(&self.name), stored, false)?;
            }
            DataMode::Local => {
                if let Some(binding) = &call.instruction().binding {
                    if self.default_only {
                        call.bind_result(binding, value.clone(), false)?;
                    } else {
                        call.publish(binding, value.clone())?;
                    }
                }
            }
        }
        Ok(Outcome::new(Output::from_option(value), signal))
    }

    fn publishes_result(&self) -> bool {
        false
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mode = match self.mode {
            DataMode::Local => "local",
            DataMode::Sub => "sub",
            DataMode::Parameter => "parameter",
        };
        vec![("name", self.name.clone()), ("mode", mode.to_string())]
    }
}

/* ===================== Literal ===================== */

#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralFactory;

impl TagFactory for LiteralFactory {
    fn kind(&self) -> TagKind {
        TagKind::Action
    }

    fn keeps_text(&self) -> bool {
        true
    }

    fn create(&self, el: &mut Element, _cx: &mut FactoryCx<'_>) -> Result<Created> {
        Ok(Created::owning_subtree(LiteralTag { text: el.text() }))
    }
}

/// Its raw text, never evaluated
#[derive(Debug)]
pub struct LiteralTag {
    text: String,
}

impl Tag for LiteralTag {
    fn type_name(&self) -> &'static str {
        "literal"
    }

    fn execute(&self, _call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        Ok(Outcome::value(Val::Str(self.text.clone())))
    }
}
