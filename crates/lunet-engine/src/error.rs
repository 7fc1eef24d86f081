//! Engine error types
//!
//! Errors raised inside the VM travel as values (usually strings) through the
//! protected-call channel, mirroring the C Lua error model. Load-time errors
//! carry the source span so embedders can render diagnostics.

use crate::lexer::Span;
use crate::value::Value;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the Lunet engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed source at load/compile time
    #[error("{chunk}: {message}")]
    Syntax {
        /// Human-readable description
        message: String,
        /// Chunk name the source was loaded under
        chunk: String,
        /// Byte range in the source
        span: Span,
    },

    /// Error raised during execution; carries the raised value
    #[error("{0}")]
    Runtime(Value),

    /// Allocator exhaustion
    #[error("not enough memory: {0}")]
    Memory(String),

    /// The error handler of a protected call itself faulted
    #[error("error in error handling: {0}")]
    ErrorHandler(String),

    /// Script file could not be read
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Raise a runtime error carrying a string message.
    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime(Value::str(message.into()))
    }

    /// The raised value, if this is a runtime error.
    pub fn raised_value(&self) -> Option<&Value> {
        match self {
            EngineError::Runtime(v) => Some(v),
            _ => None,
        }
    }
}
