//! Chained, per-invocation scopes
//!
//! Every invocation chain owns one [`Scopes`] arena. Slot 0 is the process
//! root; each call pushes a child scope and drops it again when it returns,
//! so the arena behaves like a stack whose entries link to arbitrary earlier
//! entries as their parent.
//!
//! A scope carries two independent namespaces:
//! - **consts**: user-visible named values, looked up through the parent chain;
//! - **internal** storage: framework-private values, split into a local map
//!   (this scope only) and a global map shared by every scope of the chain.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::error::ConflictError;
use crate::tag::aggregate::Accumulator;
use crate::tag::EntityKey;
use crate::values::Val;

/// Local internal key holding the overwrite flag
pub const OVERWRITE_KEY: &str = "tagflow.const.overwritable";

/// Handle to one scope of a [`Scopes`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);
}

#[derive(Debug)]
struct Frame {
    parent: Option<ScopeId>,
    seq: u64,
    consts: IndexMap<String, Val>,
    origins: HashMap<String, String>,
    local: HashMap<String, Val>,
    entity: Option<EntityKey>,
    returning: bool,
}

impl Frame {
    fn new(parent: Option<ScopeId>, seq: u64) -> Self {
        Self {
            parent,
            seq,
            consts: IndexMap::new(),
            origins: HashMap::new(),
            local: HashMap::new(),
            entity: None,
            returning: false,
        }
    }
}

/// Scope arena of one invocation chain
#[derive(Debug)]
pub struct Scopes {
    frames: Vec<Frame>,
    global: HashMap<String, Val>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    /// Create a chain holding only the process-root scope
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(None, 0)],
            global: HashMap::new(),
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId::ROOT
    }

    fn frame(&self, scope: ScopeId) -> &Frame {
        &self.frames[scope.0]
    }

    fn frame_mut(&mut self, scope: ScopeId) -> &mut Frame {
        &mut self.frames[scope.0]
    }

    /* ===================== Lifecycle ===================== */

    /// Open a child scope of `parent`
    pub fn enter(&mut self, parent: ScopeId) -> ScopeId {
        let seq = self.frame(parent).seq + 1;
        self.frames.push(Frame::new(Some(parent), seq));
        ScopeId(self.frames.len() - 1)
    }

    /// Drop `scope` together with everything opened after it
    pub fn leave(&mut self, scope: ScopeId) {
        debug_assert_eq!(scope.0 + 1, self.frames.len(), "scopes must be left in LIFO order");
        if scope != ScopeId::ROOT {
            self.frames.truncate(scope.0);
        }
    }

    /// Number of live scopes, root included
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.frame(scope).parent
    }

    /// Sequence id: parent's id plus one, the root being 0
    pub fn seq(&self, scope: ScopeId) -> u64 {
        self.frame(scope).seq
    }

    /// `scope` followed by its ancestors up to the root
    pub fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |s| self.frame(*s).parent)
    }

    /* ===================== Consts ===================== */

    /// Value bound to `id`, in this scope first and then its ancestors
    /// when `search_parent` is set
    pub fn get(&self, scope: ScopeId, id: &str, search_parent: bool) -> Option<&Val> {
        if !search_parent {
            return self.frame(scope).consts.get(id);
        }
        self.ancestors(scope)
            .find_map(|s| self.frame(s).consts.get(id))
    }

    /// Whether `id` is bound directly in `scope`
    pub fn has_const(&self, scope: ScopeId, id: &str) -> bool {
        self.frame(scope).consts.contains_key(id)
    }

    /// Bind `id` in this scope only.
    ///
    /// Fails if `check_conflict` is set and `id` is already bound here;
    /// otherwise any previous binding in this scope is replaced.
    pub fn add(
        &mut self,
        scope: ScopeId,
        id: &str,
        origin: Option<&str>,
        value: Val,
        check_conflict: bool,
    ) -> Result<(), ConflictError> {
        self.set(scope, id, origin, value, check_conflict).map(|_| ())
    }

    /// Bind `id` in this scope, returning the value it replaced.
    ///
    /// With `check_conflict` an existing binding is an error and is left
    /// untouched.
    pub fn set(
        &mut self,
        scope: ScopeId,
        id: &str,
        origin: Option<&str>,
        value: Val,
        check_conflict: bool,
    ) -> Result<Option<Val>, ConflictError> {
        if check_conflict && self.has_const(scope, id) {
            return Err(ConflictError {
                id: id.to_string(),
                scope: self.frame(scope).seq,
            });
        }
        Ok(self.replace(scope, id, origin, value))
    }

    /// Bind `id` in this scope, replacing any binding it already has
    pub fn replace(&mut self, scope: ScopeId, id: &str, origin: Option<&str>, value: Val) -> Option<Val> {
        let frame = self.frame_mut(scope);
        match origin {
            Some(tag) => {
                frame.origins.insert(id.to_string(), tag.to_string());
            }
            None => {
                frame.origins.remove(id);
            }
        }
        frame.consts.insert(id.to_string(), value)
    }

    pub fn remove(&mut self, scope: ScopeId, id: &str) -> Option<Val> {
        let frame = self.frame_mut(scope);
        frame.origins.remove(id);
        frame.consts.shift_remove(id)
    }

    /// Reverse lookup: the id bound to `value`.
    ///
    /// `strict` compares composites by identity instead of equality.
    pub fn find_id(
        &self,
        scope: ScopeId,
        value: &Val,
        strict: bool,
        search_parent: bool,
        excluded: &[&str],
    ) -> Option<&str> {
        let depth = if search_parent { usize::MAX } else { 1 };
        self.ancestors(scope).take(depth).find_map(|s| {
            self.frame(s)
                .consts
                .iter()
                .filter(|(id, _)| !excluded.contains(&id.as_str()))
                .find(|(_, v)| if strict { v.same(value) } else { *v == value })
                .map(|(id, _)| id.as_str())
        })
    }

    /// Ids bound directly in `scope`, in binding order
    pub fn const_ids(&self, scope: ScopeId) -> impl Iterator<Item = &str> {
        self.frame(scope).consts.keys().map(String::as_str)
    }

    /// Consts bound directly in `scope`
    pub fn consts(&self, scope: ScopeId) -> &IndexMap<String, Val> {
        &self.frame(scope).consts
    }

    /// Every const visible from `scope`, nearer bindings shadowing outer ones
    pub fn visible_consts(&self, scope: ScopeId) -> IndexMap<String, Val> {
        let chain: Vec<ScopeId> = self.ancestors(scope).collect();
        let mut all = IndexMap::new();
        for s in chain.into_iter().rev() {
            for (id, value) in &self.frame(s).consts {
                all.insert(id.clone(), value.clone());
            }
        }
        all
    }

    /// Name of the tag that declared `id`, if it was bound by one
    pub fn origin(&self, scope: ScopeId, id: &str) -> Option<&str> {
        self.ancestors(scope)
            .find(|s| self.frame(*s).consts.contains_key(id))
            .and_then(|s| self.frame(s).origins.get(id))
            .map(String::as_str)
    }

    /// Consts grouped by declaring tag name.
    ///
    /// Values declared by the same tag name accumulate into a list. The
    /// process root is only consulted when `include_root` is set.
    pub fn name_map(&self, scope: ScopeId, merge_parents: bool, include_root: bool) -> IndexMap<String, Val> {
        let mut chain: Vec<ScopeId> = if merge_parents {
            self.ancestors(scope).collect()
        } else {
            vec![scope]
        };
        if !include_root {
            chain.retain(|s| *s != ScopeId::ROOT);
        }
        let mut acc = Accumulator::default();
        for s in chain.into_iter().rev() {
            let frame = self.frame(s);
            for (id, value) in &frame.consts {
                if let Some(tag) = frame.origins.get(id) {
                    acc.push(tag, value.clone());
                }
            }
        }
        acc.finish()
    }

    /* ===================== Internal storage ===================== */

    /// Framework-private value from the local or the chain-wide map
    pub fn internal(&self, scope: ScopeId, key: &str, global: bool) -> Option<&Val> {
        if global {
            self.global.get(key)
        } else {
            self.frame(scope).local.get(key)
        }
    }

    /// Local internal value of the nearest scope defining `key`
    pub fn inherited_internal(&self, scope: ScopeId, key: &str) -> Option<&Val> {
        self.ancestors(scope)
            .find_map(|s| self.frame(s).local.get(key))
    }

    pub fn set_internal(&mut self, scope: ScopeId, key: &str, value: Val, global: bool) -> Option<Val> {
        if global {
            self.global.insert(key.to_string(), value)
        } else {
            self.frame_mut(scope).local.insert(key.to_string(), value)
        }
    }

    pub fn remove_internal(&mut self, scope: ScopeId, key: &str, global: bool) -> Option<Val> {
        if global {
            self.global.remove(key)
        } else {
            self.frame_mut(scope).local.remove(key)
        }
    }

    /// Whether result publishing into `scope` overwrites instead of
    /// failing on an existing binding
    pub fn overwrite_allowed(&self, scope: ScopeId) -> bool {
        self.internal(scope, OVERWRITE_KEY, false)
            .is_some_and(Val::is_truthy)
    }

    pub fn set_overwrite_allowed(&mut self, scope: ScopeId, allowed: bool) {
        self.set_internal(scope, OVERWRITE_KEY, Val::Bool(allowed), false);
    }

    /* ===================== Entity binding ===================== */

    pub fn entity(&self, scope: ScopeId) -> Option<EntityKey> {
        self.frame(scope).entity
    }

    pub fn bind_entity(&mut self, scope: ScopeId, entity: EntityKey) {
        self.frame_mut(scope).entity = Some(entity);
    }

    /// Nearest scope (self first) owned by `entity`
    pub fn find_entity_scope(&self, scope: ScopeId, entity: EntityKey) -> Option<ScopeId> {
        self.ancestors(scope)
            .find(|s| self.frame(*s).entity == Some(entity))
    }

    pub fn returning(&self, scope: ScopeId) -> bool {
        self.frame(scope).returning
    }

    pub fn set_returning(&mut self, scope: ScopeId, returning: bool) {
        self.frame_mut(scope).returning = returning;
    }

    /// Read-only view anchored at `scope`
    pub fn view(&self, scope: ScopeId) -> ScopeView<'_> {
        ScopeView { scopes: self, scope }
    }
}

/// Read-only window on one scope, used by expression evaluation and listeners
#[derive(Debug, Clone, Copy)]
pub struct ScopeView<'a> {
    scopes: &'a Scopes,
    scope: ScopeId,
}

impl<'a> ScopeView<'a> {
    pub fn id(&self) -> ScopeId {
        self.scope
    }

    pub fn seq(&self) -> u64 {
        self.scopes.seq(self.scope)
    }

    /// Const lookup through the parent chain
    pub fn get(&self, id: &str) -> Option<&'a Val> {
        self.scopes.get(self.scope, id, true)
    }

    pub fn internal(&self, key: &str, global: bool) -> Option<&'a Val> {
        self.scopes.internal(self.scope, key, global)
    }

    pub fn visible_consts(&self) -> IndexMap<String, Val> {
        self.scopes.visible_consts(self.scope)
    }

    pub fn scopes(&self) -> &'a Scopes {
        self.scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_prefers_nearest_binding() {
        let mut scopes = Scopes::new();
        let parent = scopes.enter(scopes.root());
        let child = scopes.enter(parent);

        scopes.add(parent, "x", None, Val::from(1), true).unwrap();
        assert_eq!(scopes.get(child, "x", true), Some(&Val::from(1)));
        assert_eq!(scopes.get(child, "x", false), None);

        scopes.add(child, "x", None, Val::from(2), true).unwrap();
        assert_eq!(scopes.get(child, "x", true), Some(&Val::from(2)));
        assert_eq!(scopes.get(parent, "x", true), Some(&Val::from(1)));

        assert_eq!(scopes.get(child, "missing", true), None);
    }

    #[test]
    fn test_sequence_ids_follow_parent() {
        let mut scopes = Scopes::new();
        let a = scopes.enter(scopes.root());
        let b = scopes.enter(a);
        assert_eq!(scopes.seq(scopes.root()), 0);
        assert_eq!(scopes.seq(a), 1);
        assert_eq!(scopes.seq(b), 2);
        assert_eq!(scopes.parent(b), Some(a));
    }

    #[test]
    fn test_global_internal_is_shared_by_chain() {
        let mut scopes = Scopes::new();
        let a = scopes.enter(scopes.root());
        let b = scopes.enter(scopes.root());

        scopes.set_internal(a, "k", Val::from("v"), true);
        assert_eq!(scopes.internal(b, "k", true), Some(&Val::from("v")));
        assert_eq!(scopes.internal(scopes.root(), "k", true), Some(&Val::from("v")));

        scopes.set_internal(a, "local", Val::from(1), false);
        assert_eq!(scopes.internal(b, "local", false), None);
    }

    #[test]
    fn test_internal_never_leaks_into_consts() {
        let mut scopes = Scopes::new();
        let a = scopes.enter(scopes.root());
        let b = scopes.enter(a);

        scopes.set_internal(a, "k", Val::from(1), false);
        assert_eq!(scopes.get(b, "k", true), None);
        assert_eq!(scopes.internal(b, "k", false), None);
        assert_eq!(scopes.inherited_internal(b, "k"), Some(&Val::from(1)));
    }

    #[test]
    fn test_add_conflict() {
        let mut scopes = Scopes::new();
        let s = scopes.enter(scopes.root());

        scopes.add(s, "x", None, Val::from("v1"), true).unwrap();
        let err = scopes.add(s, "x", None, Val::from("v2"), true).unwrap_err();
        assert_eq!(err.id, "x");
        assert_eq!(err.scope, 1);
        assert_eq!(scopes.get(s, "x", false), Some(&Val::from("v1")));

        scopes.add(s, "x", None, Val::from("v2"), false).unwrap();
        assert_eq!(scopes.get(s, "x", false), Some(&Val::from("v2")));
    }

    #[test]
    fn test_conflict_is_per_scope() {
        let mut scopes = Scopes::new();
        let parent = scopes.enter(scopes.root());
        let child = scopes.enter(parent);

        scopes.add(parent, "x", None, Val::from(1), true).unwrap();
        scopes.add(child, "x", None, Val::from(2), true).unwrap();
    }

    #[test]
    fn test_set_returns_previous_value() {
        let mut scopes = Scopes::new();
        let s = scopes.enter(scopes.root());

        assert_eq!(scopes.set(s, "x", None, Val::from(1), false).unwrap(), None);
        assert_eq!(
            scopes.set(s, "x", None, Val::from(2), false).unwrap(),
            Some(Val::from(1))
        );
        assert!(scopes.set(s, "x", None, Val::from(3), true).is_err());
        assert_eq!(scopes.get(s, "x", false), Some(&Val::from(2)));

        assert_eq!(scopes.replace(s, "x", Some("data"), Val::from(4)), Some(Val::from(2)));
        assert_eq!(scopes.origin(s, "x"), Some("data"));
    }

    #[test]
    fn test_find_id_strict_and_loose() {
        let mut scopes = Scopes::new();
        let parent = scopes.enter(scopes.root());
        let child = scopes.enter(parent);

        let list = Val::list(vec![Val::from(1)]);
        scopes.add(parent, "shared", None, list.clone(), true).unwrap();
        scopes.add(child, "copy", None, Val::list(vec![Val::from(1)]), true).unwrap();

        assert_eq!(scopes.find_id(child, &list, false, true, &[]), Some("copy"));
        assert_eq!(scopes.find_id(child, &list, true, true, &[]), Some("shared"));
        assert_eq!(scopes.find_id(child, &list, true, false, &[]), None);
        assert_eq!(scopes.find_id(child, &list, false, true, &["copy"]), Some("shared"));
    }

    #[test]
    fn test_leave_drops_subtree() {
        let mut scopes = Scopes::new();
        let a = scopes.enter(scopes.root());
        let b = scopes.enter(a);
        scopes.add(b, "x", None, Val::from(1), true).unwrap();
        scopes.leave(b);
        scopes.leave(a);
        assert_eq!(scopes.len(), 1);

        let c = scopes.enter(scopes.root());
        assert_eq!(scopes.get(c, "x", true), None);
    }

    #[test]
    fn test_overwrite_flag_is_local() {
        let mut scopes = Scopes::new();
        let a = scopes.enter(scopes.root());
        let b = scopes.enter(a);
        assert!(!scopes.overwrite_allowed(a));
        scopes.set_overwrite_allowed(a, true);
        assert!(scopes.overwrite_allowed(a));
        assert!(!scopes.overwrite_allowed(b));
    }

    #[test]
    fn test_name_map_groups_by_origin() {
        let mut scopes = Scopes::new();
        scopes.add(scopes.root(), "prop", Some("property"), Val::from("p"), true).unwrap();
        let a = scopes.enter(scopes.root());
        let b = scopes.enter(a);
        scopes.add(a, "first", Some("item"), Val::from(1), true).unwrap();
        scopes.add(b, "second", Some("item"), Val::from(2), true).unwrap();
        scopes.add(b, "plain", None, Val::from(3), true).unwrap();

        let map = scopes.name_map(b, true, false);
        assert_eq!(map.len(), 1);
        assert_eq!(map["item"], Val::list(vec![Val::from(1), Val::from(2)]));

        let map = scopes.name_map(b, false, false);
        assert_eq!(map["item"], Val::from(2));

        let map = scopes.name_map(b, true, true);
        assert_eq!(map["property"], Val::from("p"));
        assert_eq!(scopes.origin(b, "first"), Some("item"));
    }

    #[test]
    fn test_entity_scope_lookup() {
        let mut scopes = Scopes::new();
        let outer = scopes.enter(scopes.root());
        scopes.bind_entity(outer, EntityKey(7));
        let call = scopes.enter(outer);
        let inner = scopes.enter(call);
        scopes.bind_entity(inner, EntityKey(7));

        assert_eq!(scopes.find_entity_scope(inner, EntityKey(7)), Some(inner));
        assert_eq!(scopes.find_entity_scope(call, EntityKey(7)), Some(outer));
        assert_eq!(scopes.find_entity_scope(call, EntityKey(8)), None);
    }
}
