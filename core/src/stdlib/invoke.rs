//! Invoker tags: resource invocations, expressions and beans
//!
//! An invoker opens a scope of its own. Its children are its parameters:
//! the parser turns plain attributes into leading data children, and wraps
//! any child that is itself an invoker into `<value>` so that its result
//! becomes the `value` parameter.

use anyhow::{anyhow, bail, Result};
use std::sync::Arc;

use crate::error::EngineError;
use crate::executor::{Call, Outcome, Signal};
use crate::expr::Expression;
use crate::parser::{Element, FactoryCx, Node};
use crate::tag::aggregate::DEFAULT_VALUE_NAME;
use crate::tag::registry::{ns, Created, TagAttrs, TagFactory};
use crate::tag::{Bean, BeanTag, Tag, TagKind};

/* ===================== Parameter wiring ===================== */

/// Insert a data child for every unqualified attribute accepted by `keep`,
/// in attribute order, ahead of the existing children
pub fn push_down_attributes(el: &mut Element, keep: impl Fn(&str) -> bool) {
    let line = el.line;
    let pushed: Vec<Node> = el
        .attrs
        .iter()
        .filter(|a| a.ns.is_none() && keep(&a.local))
        .map(|a| Node::Element(Element::data(&a.local, line, &a.value)))
        .collect();
    el.children.splice(0..0, pushed);
}

/// Parameter wiring shared by every invoker factory
pub fn prepare_invocation(el: &mut Element, attrs: TagAttrs, cx: &FactoryCx<'_>) -> Result<()> {
    push_down_attributes(el, |name| !attrs.is_guard(name));

    for node in el.children.iter_mut() {
        let Node::Element(child) = node else {
            continue;
        };
        if cx.classify(child)? != TagKind::Invoker {
            continue;
        }
        let line = child.line;
        let invoker = std::mem::replace(child, Element::new(Some(ns::DATA), DEFAULT_VALUE_NAME, line));
        child.children.push(Node::Element(invoker));
    }
    Ok(())
}

/* ===================== Expression ===================== */

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionFactory;

impl TagFactory for ExpressionFactory {
    fn kind(&self) -> TagKind {
        TagKind::Invoker
    }

    fn keeps_text(&self) -> bool {
        true
    }

    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created> {
        let text = el.text();
        if text.trim().is_empty() {
            bail!("<{}> must have a non-blank text", el.local);
        }
        let expr = cx.compile(text.trim())?;
        Ok(Created::owning_subtree(ExpressionTag { expr }))
    }
}

/// Evaluates its text
#[derive(Debug)]
pub struct ExpressionTag {
    expr: Arc<dyn Expression>,
}

impl Tag for ExpressionTag {
    fn type_name(&self) -> &'static str {
        "expression"
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        let value = self.expr.evaluate(call.view())?;
        Ok(Outcome::optional(Some(value).filter(|v| !v.is_null())))
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![("value", self.expr.source().to_string())]
    }
}

/* ===================== Resource invocation ===================== */

/// Builds invocations of tags that name another resource
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeFactory;

impl TagFactory for InvokeFactory {
    fn kind(&self) -> TagKind {
        TagKind::Invoker
    }

    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created> {
        prepare_invocation(el, self.attrs(), cx)?;
        let target = cx
            .target()
            .cloned()
            .ok_or_else(|| anyhow!("<{}> does not name a resource", el.local))?;
        if cx.parse_target()?.is_none() {
            bail!("Target resource not found: {}", target.name());
        }
        Ok(Created::new(InvokeTag { name: target.name() }))
    }
}

/// Runs another entity with the evaluated parameters as its scope
#[derive(Debug)]
pub struct InvokeTag {
    name: String,
}

impl InvokeTag {
    pub fn target(&self) -> &str {
        &self.name
    }
}

impl Tag for InvokeTag {
    fn type_name(&self) -> &'static str {
        "invoke"
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        call.with_child_scope(|call, scope| {
            let children = call.run_children(scope)?;
            if children.signal == Signal::Abort {
                return Ok(Outcome::signal(Signal::Abort));
            }

            // parsed at factory time, so this is normally a cache hit
            let entity = call.engine().parser().load(&self.name)?;
            let pending = call.invocation().take_result();
            let outcome = call.invoke_entity(&entity, scope);
            call.invocation().set_result(pending);
            outcome
        })
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![("target", self.name.clone())]
    }
}

/* ===================== Beans ===================== */

/// Builds [`BeanTag`]s from a prototype bean
#[derive(Debug, Clone)]
pub struct BeanFactory<B> {
    prototype: B,
}

impl<B: Bean + Clone> BeanFactory<B> {
    pub fn new(prototype: B) -> Self {
        Self { prototype }
    }
}

impl<B: Bean + Clone> TagFactory for BeanFactory<B> {
    fn kind(&self) -> TagKind {
        TagKind::Invoker
    }

    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created> {
        prepare_invocation(el, self.attrs(), cx)?;
        Ok(Created::new(BeanTag::new(self.prototype.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::xml::read_document;

    #[test]
    fn test_push_down_keeps_attribute_order() {
        let mut el = read_document(br#"<log level="warn" value="hi" if="x"><a/></log>"#).unwrap();
        push_down_attributes(&mut el, |name| name != "if");

        let names: Vec<_> = el.elements().map(|e| e.local.as_str()).collect();
        assert_eq!(names, vec!["level", "value", "a"]);
        let first = el.elements().next().unwrap();
        assert_eq!(first.ns.as_deref(), Some(ns::DATA));
        assert_eq!(first.text(), "warn");
    }

    #[test]
    fn test_push_down_skips_qualified_attributes() {
        let mut el = read_document(
            br#"<log xmlns:t="urn:tagflow:root" t:id="r" value="hi"/>"#,
        )
        .unwrap();
        push_down_attributes(&mut el, |_| true);
        let names: Vec<_> = el.elements().map(|e| e.local.as_str()).collect();
        assert_eq!(names, vec!["value"]);
    }
}
