//! Shape inference for composite results
//!
//! Children of a data tag produce either named items (from nested data
//! tags) or plain values. The shape of the parent's value is chosen from
//! what the children produced:
//!
//! | children              | result                                        |
//! |-----------------------|-----------------------------------------------|
//! | none / only nulls     | absent                                        |
//! | all named             | tree, repeated names collected into a list    |
//! | named and unnamed     | tree, unnamed values collected under `value`  |
//! | only unnamed          | list, or the value itself when there is one   |

use indexmap::IndexMap;

use crate::executor::Output;
use crate::values::{Tree, Val};

/// Key unnamed values are collected under in a mixed tree
pub const DEFAULT_VALUE_NAME: &str = "value";

/// Named value handed from a nested data tag to its parent
#[derive(Debug, Clone, PartialEq)]
pub struct ConstNode {
    pub name: String,
    pub value: Option<Val>,
}

enum Slot {
    One(Val),
    Many(Vec<Val>),
}

/// Ordered tree builder where repeated keys accumulate
#[derive(Default)]
pub struct Accumulator {
    entries: IndexMap<String, Slot>,
}

impl Accumulator {
    pub fn push(&mut self, key: &str, value: Val) {
        match self.entries.get_mut(key) {
            None => {
                self.entries.insert(key.to_string(), Slot::One(value));
            }
            Some(slot) => {
                *slot = match std::mem::replace(slot, Slot::Many(Vec::new())) {
                    Slot::One(first) => Slot::Many(vec![first, value]),
                    Slot::Many(mut items) => {
                        items.push(value);
                        Slot::Many(items)
                    }
                };
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Tree {
        self.entries
            .into_iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::One(value) => value,
                    Slot::Many(items) => Val::list(items),
                };
                (key, value)
            })
            .collect()
    }
}

/// Expand nested (transparent container) results in place
pub fn flatten(items: Vec<Output>) -> Vec<Output> {
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Output::Nested(inner) => flat.extend(flatten(inner)),
            other => flat.push(other),
        }
    }
    flat
}

/// Combine child results into one value
pub fn aggregate(items: Vec<Output>) -> Option<Val> {
    let items = flatten(items);
    let named = items.iter().filter(|i| matches!(i, Output::Named(_))).count();

    if named == 0 {
        let values: Vec<Val> = items
            .into_iter()
            .filter_map(|item| match item {
                Output::Value(v) if !v.is_null() => Some(v),
                _ => None,
            })
            .collect();
        return shrink(values);
    }

    let mut acc = Accumulator::default();
    for item in items {
        match item {
            Output::Named(ConstNode { name, value: Some(v) }) if !v.is_null() => acc.push(&name, v),
            Output::Value(v) if !v.is_null() => acc.push(DEFAULT_VALUE_NAME, v),
            _ => {}
        }
    }
    if acc.is_empty() {
        None
    } else {
        Some(Val::tree(acc.finish()))
    }
}

fn shrink(mut values: Vec<Val>) -> Option<Val> {
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Val::list(values)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    fn named(name: &str, v: impl Into<Val>) -> Output {
        Output::Named(ConstNode {
            name: name.to_string(),
            value: Some(v.into()),
        })
    }

    fn plain(v: impl Into<Val>) -> Output {
        Output::Value(v.into())
    }

    fn tree(entries: std::collections::HashMap<&str, Val>, order: &[&str]) -> Val {
        let mut t = Tree::new();
        for key in order {
            t.insert(key.to_string(), entries[key].clone());
        }
        Val::tree(t)
    }

    #[test]
    fn test_single_named_item() {
        let result = aggregate(vec![named("a", 1)]);
        assert_eq!(result, Some(tree(hashmap! { "a" => Val::from(1) }, &["a"])));
    }

    #[test]
    fn test_repeated_names_accumulate() {
        let result = aggregate(vec![named("a", 1), named("a", 2)]);
        assert_eq!(
            result,
            Some(tree(
                hashmap! { "a" => Val::list(vec![Val::from(1), Val::from(2)]) },
                &["a"]
            ))
        );
    }

    #[test]
    fn test_mixed_items_use_value_key() {
        let result = aggregate(vec![named("a", 1), plain(5)]);
        assert_eq!(
            result,
            Some(tree(
                hashmap! { "a" => Val::from(1), "value" => Val::from(5) },
                &["a", "value"]
            ))
        );
    }

    #[test]
    fn test_unnamed_items_become_list() {
        assert_eq!(
            aggregate(vec![plain(3), plain(4)]),
            Some(Val::list(vec![Val::from(3), Val::from(4)]))
        );
        assert_eq!(
            aggregate(vec![plain(3), Output::Value(Val::Null), Output::Absent, plain(4)]),
            Some(Val::list(vec![Val::from(3), Val::from(4)]))
        );
    }

    #[test]
    fn test_single_unnamed_item_is_scalar() {
        assert_eq!(aggregate(vec![plain("x")]), Some(Val::from("x")));
    }

    #[test]
    fn test_empty_results_are_absent() {
        assert_eq!(aggregate(vec![]), None);
        assert_eq!(aggregate(vec![Output::Value(Val::Null)]), None);
        assert_eq!(
            aggregate(vec![Output::Named(ConstNode {
                name: "a".to_string(),
                value: None
            })]),
            None
        );
    }

    #[test]
    fn test_nested_results_are_flattened() {
        let result = aggregate(vec![
            plain(1),
            Output::Nested(vec![plain(2), Output::Nested(vec![plain(3)])]),
        ]);
        assert_eq!(
            result,
            Some(Val::list(vec![Val::from(1), Val::from(2), Val::from(3)]))
        );
    }

    #[test]
    fn test_accumulator_keeps_first_seen_order() {
        let mut acc = Accumulator::default();
        acc.push("b", Val::from(1));
        acc.push("a", Val::from(2));
        acc.push("b", Val::from(3));
        acc.push("b", Val::from(4));
        let tree = acc.finish();
        assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(
            tree["b"],
            Val::list(vec![Val::from(1), Val::from(3), Val::from(4)])
        );
    }
}
