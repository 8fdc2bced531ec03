//! Declared tag fields and per-call property binding
//!
//! A bean tag declares a static list of [`Field`]s. Each call resolves them
//! into a fresh [`Fields`] activation record: start from the tag's
//! baseline, check parameter names, then take every field's value from the
//! scope. The instruction itself is never written to, so a cached tree can
//! be shared by any number of calls.

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use std::fmt;

use super::Tag;
use crate::error::EngineError;
use crate::executor::{Call, Outcome, Signal};
use crate::scope::{ScopeId, Scopes};
use crate::values::Val;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Number,
    Integer,
    Any,
}

impl FieldKind {
    /// Primitive fields have no "unset" value and keep their baseline
    /// when the scope binds them to null
    pub fn is_primitive(&self) -> bool {
        matches!(self, FieldKind::Bool | FieldKind::Number | FieldKind::Integer)
    }

    pub fn coerce(&self, field: &str, value: &Val) -> Result<Val> {
        let invalid = || anyhow!("Parameter '{}' expects {:?}, got {} '{}'", field, self, value.type_name(), value);
        match (self, value) {
            (FieldKind::Any, v) => Ok(v.clone()),
            (_, Val::Null) => Ok(Val::Null),
            (FieldKind::Text, v) => Ok(Val::Str(v.to_string())),
            (FieldKind::Bool, Val::Bool(b)) => Ok(Val::Bool(*b)),
            (FieldKind::Bool, Val::Str(s)) => match s.trim() {
                "true" => Ok(Val::Bool(true)),
                "false" => Ok(Val::Bool(false)),
                _ => Err(invalid()),
            },
            (FieldKind::Bool, _) => Err(invalid()),
            (FieldKind::Number, v) => v.as_f64().map(Val::Num).ok_or_else(invalid),
            (FieldKind::Integer, v) => match v.as_f64() {
                Some(n) if n.fract() == 0.0 => Ok(Val::Num(n)),
                _ => Err(invalid()),
            },
        }
    }
}

/// One externally bindable configuration slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Resolved field values for one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    values: IndexMap<&'static str, Val>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<Val>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn set(&mut self, name: &'static str, value: Val) -> Option<Val> {
        self.values.insert(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Val::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(Val::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Val::as_f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Val)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A tag configured through declared fields
pub trait Bean: Send + Sync + fmt::Debug + 'static {
    fn type_name(&self) -> &'static str;

    fn fields(&self) -> &'static [Field];

    /// Field values before any binding
    fn baseline(&self) -> Fields {
        Fields::new()
    }

    /// Reject parameters that match no field
    fn strict(&self) -> bool {
        true
    }

    fn before_bind(&self, _fields: &mut Fields) -> Result<()> {
        Ok(())
    }

    fn after_bind(&self, _fields: &mut Fields) -> Result<()> {
        Ok(())
    }

    /// Run the action; `call` runs against the bean's own parameter scope
    fn invoke(&self, call: &mut Call<'_>, fields: &Fields) -> Result<Option<Val>>;
}

/// Invoker tag around a [`Bean`]: evaluates its parameter children into a
/// child scope, binds fields from it and invokes the bean there
#[derive(Debug)]
pub struct BeanTag<B: Bean> {
    bean: B,
    baseline: Fields,
}

impl<B: Bean> BeanTag<B> {
    pub fn new(bean: B) -> Self {
        let baseline = bean.baseline();
        Self { bean, baseline }
    }

    pub fn bean(&self) -> &B {
        &self.bean
    }

    pub fn baseline(&self) -> &Fields {
        &self.baseline
    }

    /// Build the activation record for a call running in `scope`.
    ///
    /// `own_id` is the result-binding attribute, exempt from the strict
    /// name check.
    pub fn bind(&self, scopes: &Scopes, scope: ScopeId, own_id: Option<&str>, strict: bool) -> Result<Fields> {
        let schema = self.bean.fields();
        if strict && self.bean.strict() {
            check_names(schema, scopes.const_ids(scope), own_id)?;
        }

        let mut fields = self.baseline.clone();
        self.bean.before_bind(&mut fields)?;
        for field in schema {
            let Some(value) = scopes.get(scope, field.name, true) else {
                continue;
            };
            if value.is_null() && field.kind.is_primitive() {
                continue;
            }
            fields.set(field.name, field.kind.coerce(field.name, value)?);
        }
        if let Some(missing) = schema.iter().find(|f| f.required && fields.get(f.name).is_none()) {
            bail!("Missing required parameter '{}'", missing.name);
        }
        self.bean.after_bind(&mut fields)?;
        Ok(fields)
    }
}

fn check_names<'s>(schema: &[Field], ids: impl Iterator<Item = &'s str>, own_id: Option<&str>) -> Result<()> {
    let unknown: Vec<&str> = ids
        .filter(|id| Some(*id) != own_id)
        .filter(|id| !schema.iter().any(|f| f.name == *id))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    let allowed: Vec<&str> = schema.iter().map(|f| f.name).collect();
    bail!(
        "Unsupported parameter(s) passed: {}, the acceptable parameters are: {}",
        unknown.join(", "),
        allowed.join(", ")
    )
}

impl<B: Bean> Tag for BeanTag<B> {
    fn type_name(&self) -> &'static str {
        self.bean.type_name()
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        call.with_child_scope(|call, scope| {
            let children = call.run_children(scope)?;
            if !children.signal.is_none() {
                return Ok(Outcome::signal(children.signal));
            }

            let own_id = call
                .instruction()
                .binding
                .as_ref()
                .filter(|b| !b.qualified)
                .map(|b| b.attribute.as_str());
            let strict = call.engine().settings().strict_parameters;
            let fields = self.bind(call.scopes(), scope, own_id, strict)?;

            let mut inner = call.in_scope(scope);
            let value = self.bean.invoke(&mut inner, &fields)?;
            let signal = if inner.invocation().is_aborting() {
                Signal::Abort
            } else if inner.scopes().returning(inner.entity_scope()) {
                Signal::Return
            } else {
                Signal::None
            };
            Ok(Outcome::new(crate::executor::Output::from_option(value), signal))
        })
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        self.baseline
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, v.to_string()))
            .collect()
    }
}
