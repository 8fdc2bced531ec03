//! Error types
//!
//! Three kinds of failure surface from the engine:
//! - [`ParseError`] stops a resource from being parsed, cached or executed.
//! - [`ConflictError`] is raised when a conflict-checked binding hits an id
//!   that is already bound in the same scope.
//! - [`RuntimeError`] wraps any other failure of a tag's action, once, at the
//!   node where it happened.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Failure while building a tag, reported against the deepest element in progress
    #[error("Cannot parse tag <{tag}> at line {line}, resource: {resource}: {message}")]
    Tag {
        tag: String,
        line: usize,
        resource: String,
        message: String,
    },

    #[error("Malformed document {resource}: {message}")]
    Xml { resource: String, message: String },

    #[error("Cannot read resource {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No resource registered under name '{0}'")]
    UnknownResource(String),

    #[error("Resource {0} has no executable root tag")]
    NotExecutable(String),
}

impl ParseError {
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Tag { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Id '{id}' is already bound in scope #{scope}")]
pub struct ConflictError {
    pub id: String,
    pub scope: u64,
}

/// Action failure attributed to the node it originated from
#[derive(Debug, Error)]
#[error("Error executing <{tag}> at line {line} of {resource}: {message}")]
pub struct RuntimeError {
    pub tag: String,
    pub line: usize,
    pub resource: String,
    /// Sequence id of the scope the failure originated in
    pub scope: u64,
    /// Call trace, innermost first
    pub trace: Vec<String>,
    pub message: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Raw action failure not yet attributed to a node
    #[error("{0:#}")]
    Action(anyhow::Error),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ConflictError>() {
            Ok(conflict) => return EngineError::Conflict(conflict),
            Err(err) => err,
        };
        match err.downcast::<ParseError>() {
            Ok(parse) => EngineError::Parse(parse),
            Err(err) => EngineError::Action(err),
        }
    }
}

impl EngineError {
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            EngineError::Runtime(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}
