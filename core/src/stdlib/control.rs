//! Transparent control tags: `<if>`, `<else>` and `<mutex>`
//!
//! Control tags run their children in the scope they are in and hand the
//! children's results up unchanged.

use anyhow::{anyhow, bail, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::executor::{Call, Outcome};
use crate::expr::Expression;
use crate::parser::{Element, FactoryCx};
use crate::sync::NamedLocks;
use crate::tag::registry::{Created, TagAttrs, TagFactory};
use crate::tag::{Tag, TagKind};
use crate::values::Val;

/// Local internal key recording whether the last `<if>`/`<else>` branch ran
const IF_RAN: &str = "tagflow.control.if_ran";

const TEST_ATTR: &str = "test";

const CONDITIONAL: TagAttrs = TagAttrs {
    id: None,
    guard: Some(TEST_ATTR),
    negated_guard: None,
};

fn set_if_ran(call: &mut Call<'_>, ran: bool) {
    let scope = call.scope();
    call.scopes_mut().set_internal(scope, IF_RAN, Val::Bool(ran), false);
}

fn if_ran(call: &Call<'_>) -> bool {
    matches!(
        call.scopes().internal(call.scope(), IF_RAN, false),
        Some(Val::Bool(true))
    )
}

/* ===================== if ===================== */

#[derive(Debug, Clone, Copy, Default)]
pub struct IfFactory;

impl TagFactory for IfFactory {
    fn kind(&self) -> TagKind {
        TagKind::Control
    }

    fn attrs(&self) -> TagAttrs {
        CONDITIONAL
    }

    fn create(&self, el: &mut Element, _cx: &mut FactoryCx<'_>) -> Result<Created> {
        if el.attr(TEST_ATTR).is_none() {
            bail!("<{}> needs a '{}' attribute", el.local, TEST_ATTR);
        }
        Ok(Created::new(IfTag))
    }
}

#[derive(Debug)]
pub struct IfTag;

impl Tag for IfTag {
    fn type_name(&self) -> &'static str {
        "if"
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        let scope = call.scope();
        let children = call.run_children(scope)?;
        set_if_ran(call, true);
        Ok(children.into_outcome())
    }

    fn on_not_executed(&self, call: &mut Call<'_>) -> Result<()> {
        set_if_ran(call, false);
        Ok(())
    }
}

/* ===================== else ===================== */

#[derive(Debug, Clone, Copy, Default)]
pub struct ElseFactory;

impl TagFactory for ElseFactory {
    fn kind(&self) -> TagKind {
        TagKind::Control
    }

    fn attrs(&self) -> TagAttrs {
        CONDITIONAL
    }

    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created> {
        let follows_branch = cx.previous_sibling().is_some_and(|prev| match prev.tag.type_name() {
            "if" => true,
            "else" => prev.guard.is_some(),
            _ => false,
        });
        if !follows_branch {
            bail!(
                "<{}> must follow an <if> or an <else> that has a '{}' attribute",
                el.local,
                TEST_ATTR
            );
        }
        Ok(Created::new(ElseTag))
    }
}

/// Runs when no preceding branch of its chain ran
#[derive(Debug)]
pub struct ElseTag;

impl Tag for ElseTag {
    fn type_name(&self) -> &'static str {
        "else"
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        if if_ran(call) {
            return Ok(Outcome::absent());
        }
        let scope = call.scope();
        let children = call.run_children(scope)?;
        set_if_ran(call, true);
        Ok(children.into_outcome())
    }
}

/* ===================== mutex ===================== */

#[derive(Debug, Clone, Copy, Default)]
pub struct MutexFactory;

impl TagFactory for MutexFactory {
    fn kind(&self) -> TagKind {
        TagKind::Control
    }

    fn create(&self, el: &mut Element, cx: &mut FactoryCx<'_>) -> Result<Created> {
        let name = el.attr("name").map(|s| cx.compile(s)).transpose()?;
        let timeout = el.attr("timeout").map(|s| cx.compile(s)).transpose()?;
        Ok(Created::new(MutexTag { name, timeout }))
    }
}

/// Critical section shared by every chain in the process, keyed by name
#[derive(Debug)]
pub struct MutexTag {
    name: Option<Arc<dyn Expression>>,
    timeout: Option<Arc<dyn Expression>>,
}

impl MutexTag {
    fn timeout(&self, call: &Call<'_>) -> Result<Duration> {
        let Some(expr) = &self.timeout else {
            return Ok(Duration::from_millis(call.engine().settings().mutex_timeout_ms));
        };
        let value = expr.evaluate(call.view())?;
        if value.is_null() {
            return Ok(Duration::from_millis(call.engine().settings().mutex_timeout_ms));
        }
        let millis = value
            .as_f64()
            .filter(|ms| *ms >= 0.0)
            .ok_or_else(|| anyhow!("Mutex timeout must be a number of milliseconds, got '{}'", value))?;
        Ok(Duration::from_millis(millis as u64))
    }
}

impl Tag for MutexTag {
    fn type_name(&self) -> &'static str {
        "mutex"
    }

    fn execute(&self, call: &mut Call<'_>) -> Result<Outcome, EngineError> {
        let name = match &self.name {
            Some(expr) => expr.evaluate_string(call.view())?.unwrap_or_default(),
            None => String::new(),
        };
        let timeout = self.timeout(call)?;

        let _guard = NamedLocks::global().acquire(&name, timeout)?;
        let scope = call.scope();
        let children = call.run_children(scope)?;
        Ok(children.into_outcome())
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(name) = &self.name {
            fields.push(("name", name.source().to_string()));
        }
        if let Some(timeout) = &self.timeout {
            fields.push(("timeout", timeout.source().to_string()));
        }
        fields
    }
}
