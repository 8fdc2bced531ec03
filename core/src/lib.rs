pub mod config;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod expr;
pub mod init;
pub mod parser;
pub mod resource;
pub mod scope;
pub mod stdlib;
pub mod sync;
pub mod tag;
pub mod telemetry;
pub mod values;

// Re-export main types
pub use error::{ConflictError, EngineError, ParseError, RuntimeError};
pub use executor::{Engine, Invocation};
pub use values::Val;

// Re-export init API for convenience
pub use init::EngineBuilder;
