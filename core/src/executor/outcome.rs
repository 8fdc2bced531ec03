//! Node results and control signals

use crate::tag::aggregate::{aggregate, ConstNode};
use crate::values::Val;

/// Early-termination signal travelling alongside a node's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    None,
    /// The enclosing entity returned; stop at its boundary
    Return,
    /// Everything is being aborted
    Abort,
}

impl Signal {
    pub fn is_none(&self) -> bool {
        matches!(self, Signal::None)
    }
}

/// What a node hands to its parent
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Output {
    #[default]
    Absent,
    Value(Val),
    /// Produced by a nested data tag for its data-tag parent
    Named(ConstNode),
    /// Results of a transparent container, flattened by the consumer
    Nested(Vec<Output>),
}

impl Output {
    pub fn from_option(value: Option<Val>) -> Self {
        match value {
            Some(v) => Output::Value(v),
            None => Output::Absent,
        }
    }

    /// The value this output stands for when bound to a name
    pub fn to_val(&self) -> Option<Val> {
        match self {
            Output::Absent => None,
            Output::Value(v) => Some(v.clone()),
            Output::Named(node) => node.value.clone(),
            Output::Nested(items) => aggregate(items.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    pub output: Output,
    pub signal: Signal,
}

impl Outcome {
    pub fn new(output: Output, signal: Signal) -> Self {
        Self { output, signal }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn value(value: Val) -> Self {
        Self::new(Output::Value(value), Signal::None)
    }

    pub fn optional(value: Option<Val>) -> Self {
        Self::new(Output::from_option(value), Signal::None)
    }

    /// No result, only a signal
    pub fn signal(signal: Signal) -> Self {
        Self::new(Output::Absent, signal)
    }
}

/// Collected results of running a node's children
#[derive(Debug, Default)]
pub struct Children {
    pub results: Vec<Output>,
    /// Signal that stopped the walk, if any
    pub signal: Signal,
}

impl Children {
    /// Results as the output of a transparent container
    pub fn into_outcome(self) -> Outcome {
        Outcome::new(Output::Nested(self.results), self.signal)
    }
}
