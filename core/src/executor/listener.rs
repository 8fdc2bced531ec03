//! Execution listeners

use uuid::Uuid;

use crate::scope::ScopeView;
use crate::tag::{Entity, Instruction};

/// Entry/exit hooks at process, entity and instruction level.
///
/// Exit hooks run on the error path too.
pub trait ExecutionListener: Send + Sync {
    fn on_process_start(&self, _process: Uuid, _scope: ScopeView<'_>) {}

    fn on_process_end(&self, _process: Uuid, _scope: ScopeView<'_>) {}

    fn on_entity_entry(&self, _entity: &Entity, _scope: ScopeView<'_>) {}

    fn on_entity_exit(&self, _entity: &Entity, _scope: ScopeView<'_>) {}

    fn on_tag_entry(&self, _entity: &Entity, _node: &Instruction, _scope: ScopeView<'_>) {}

    fn on_tag_exit(&self, _entity: &Entity, _node: &Instruction, _scope: ScopeView<'_>) {}
}
