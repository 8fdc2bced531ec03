//! Built-in bean tags: `<log>`, `<return>` and `<exit>`

use anyhow::{bail, Result};
use tracing::{debug, error, info, trace, warn};

use crate::executor::Call;
use crate::tag::{Bean, Field, FieldKind, Fields};
use crate::values::Val;

/* ===================== log ===================== */

static LOG_FIELDS: &[Field] = &[
    Field::new("value", FieldKind::Any),
    Field::new("level", FieldKind::Text),
];

/// Logs its value under the `tagflow::log` target and returns it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBean;

impl Bean for LogBean {
    fn type_name(&self) -> &'static str {
        "log"
    }

    fn fields(&self) -> &'static [Field] {
        LOG_FIELDS
    }

    fn baseline(&self) -> Fields {
        Fields::new().with("level", "info")
    }

    fn after_bind(&self, fields: &mut Fields) -> Result<()> {
        let level = fields.str("level").unwrap_or("info").trim().to_ascii_lowercase();
        match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!("Unknown log level '{}'", other),
        }
        fields.set("level", Val::Str(level));
        Ok(())
    }

    fn invoke(&self, call: &mut Call<'_>, fields: &Fields) -> Result<Option<Val>> {
        let value = fields.get("value").cloned();
        let message = value.as_ref().map(Val::to_string).unwrap_or_else(|| "null".to_string());
        let resource = call.entity().name();
        match fields.str("level").unwrap_or("info") {
            "trace" => trace!(target: "tagflow::log", resource = %resource, "{}", message),
            "debug" => debug!(target: "tagflow::log", resource = %resource, "{}", message),
            "warn" => warn!(target: "tagflow::log", resource = %resource, "{}", message),
            "error" => error!(target: "tagflow::log", resource = %resource, "{}", message),
            _ => info!(target: "tagflow::log", resource = %resource, "{}", message),
        }
        Ok(value)
    }
}

/* ===================== return ===================== */

static RETURN_FIELDS: &[Field] = &[Field::new("value", FieldKind::Any)];

/// Sets the invocation result and stops the current entity
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnBean;

impl Bean for ReturnBean {
    fn type_name(&self) -> &'static str {
        "return"
    }

    fn fields(&self) -> &'static [Field] {
        RETURN_FIELDS
    }

    fn invoke(&self, call: &mut Call<'_>, fields: &Fields) -> Result<Option<Val>> {
        let value = fields.get("value").cloned();
        call.invocation().set_result(value.clone());

        let entity_scope = call.entity_scope();
        call.scopes_mut().set_returning(entity_scope, true);
        debug!(resource = %call.entity().resource(), "Returning from entity");
        Ok(value)
    }
}

/* ===================== exit ===================== */

/// Aborts the whole invocation chain
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitBean;

impl Bean for ExitBean {
    fn type_name(&self) -> &'static str {
        "exit"
    }

    fn fields(&self) -> &'static [Field] {
        &[]
    }

    fn invoke(&self, call: &mut Call<'_>, _fields: &Fields) -> Result<Option<Val>> {
        info!(resource = %call.entity().resource(), "Exit requested, aborting");
        call.invocation().abort();
        Ok(None)
    }
}
