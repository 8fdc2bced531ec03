//! Runtime value types

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Ordered string-keyed tree of values
pub type Tree = IndexMap<String, Val>;

/// Runtime value type
///
/// Composite values are reference counted so that a value published into a
/// scope and later read back is the *same* value, which is what strict
/// reverse lookups compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Arc<Vec<Val>>),
    Tree(Arc<Tree>),
}

impl Val {
    pub fn list(items: Vec<Val>) -> Self {
        Val::List(Arc::new(items))
    }

    pub fn tree(entries: Tree) -> Self {
        Val::Tree(Arc::new(entries))
    }

    /// Check if value is truthy (for guards)
    ///
    /// Anything that is not null, not `false` and does not render as the
    /// string `"false"` is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Str(s) => s != "false",
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    /// Null, blank strings and empty composites
    pub fn is_empty(&self) -> bool {
        match self {
            Val::Null => true,
            Val::Str(s) => s.trim().is_empty(),
            Val::List(items) => items.is_empty(),
            Val::Tree(entries) => entries.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Num(n) => Some(*n),
            Val::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Identity comparison: composites must share the same allocation,
    /// scalars compare by value.
    pub fn same(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::List(a), Val::List(b)) => Arc::ptr_eq(a, b),
            (Val::Tree(a), Val::Tree(b)) => Arc::ptr_eq(a, b),
            (Val::List(_), _) | (Val::Tree(_), _) => false,
            _ => self == other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::List(_) => "list",
            Val::Tree(_) => "tree",
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Val::Num(n) => write!(f, "{}", n),
            Val::Str(s) => write!(f, "{}", s),
            Val::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Val::Tree(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Num(n as f64)
    }
}

impl From<i32> for Val {
    fn from(n: i32) -> Self {
        Val::Num(n as f64)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(s)
    }
}

impl From<Vec<Val>> for Val {
    fn from(items: Vec<Val>) -> Self {
        Val::list(items)
    }
}

impl From<Tree> for Val {
    fn from(entries: Tree) -> Self {
        Val::tree(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Val::Null.is_truthy());
        assert!(!Val::Bool(false).is_truthy());
        assert!(!Val::from("false").is_truthy());
        assert!(Val::from("").is_truthy());
        assert!(Val::Num(0.0).is_truthy());
        assert!(Val::list(vec![]).is_truthy());
    }

    #[test]
    fn test_same_uses_identity_for_composites() {
        let a = Val::list(vec![Val::from(1)]);
        let b = Val::list(vec![Val::from(1)]);
        assert_eq!(a, b);
        assert!(!a.same(&b));
        assert!(a.same(&a.clone()));
        assert!(Val::from("x").same(&Val::from("x")));
    }

    #[test]
    fn test_display_and_json() {
        let mut tree = Tree::new();
        tree.insert("a".to_string(), Val::from(1));
        tree.insert("b".to_string(), Val::list(vec![Val::from(2.5), Val::from("x")]));
        let val = Val::tree(tree);
        assert_eq!(val.to_string(), "{a=1, b=[2.5, x]}");
        assert_eq!(
            serde_json::to_string(&val).unwrap(),
            r#"{"a":1.0,"b":[2.5,"x"]}"#
        );
    }
}
