//! Host-side error taxonomy.
//!
//! Errors raised by host-driven API calls surface immediately as `Err`.
//! Errors raised *inside* a foreign call travel the engine's error channel
//! as values and come back out of a protected entry point as `Runtime` (the
//! foreign error value converted to a host string).

use lunet_engine::{EngineError, TypeTag};

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong at the embedding boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed script at load/compile time
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Error raised during execution, including trampoline-translated host
    /// failures; carries the foreign error value as a string
    #[error("{0}")]
    Runtime(String),

    /// Foreign allocator exhaustion
    #[error("not enough memory: {0}")]
    Memory(String),

    /// The configured error handler itself faulted
    #[error("error in error handling: {0}")]
    ErrorHandler(String),

    /// A stack value had a different type than required
    #[error("{} expected, found {}", expected.name(), found.name())]
    TypeExpected {
        /// Type actually found on the stack
        found: TypeTag,
        /// Type the operation required
        expected: TypeTag,
    },

    /// A receiver userdata resolved to a host object of the wrong type
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected host type name
        expected: String,
        /// Actual host type name
        got: String,
    },

    /// A trampoline argument had the wrong foreign type
    #[error("bad argument #{index}: {} expected, got {}", expected.name(), found.name())]
    ArgumentTypeMismatch {
        /// 1-based argument position (excluding the receiver)
        index: usize,
        /// Declared parameter type
        expected: TypeTag,
        /// Foreign type actually passed
        found: TypeTag,
    },

    /// Index dispatch found no exposed member under this key
    #[error("attempt to index {0} on a userdata value")]
    IndexNotFound(String),

    /// No foreign mapping exists for this host value
    #[error("no script representation for a {0} value")]
    UnsupportedType(&'static str),

    /// Script file could not be read
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert into an engine error for raising through the foreign error
    /// channel. `Runtime` keeps its message verbatim; everything else
    /// stringifies through its display form.
    pub(crate) fn into_engine(self) -> EngineError {
        match self {
            Error::Runtime(message) => EngineError::runtime(message),
            other => EngineError::runtime(other.to_string()),
        }
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Syntax { .. } => Error::Syntax(e.to_string()),
            EngineError::Runtime(v) => Error::Runtime(v.to_string()),
            EngineError::Memory(m) => Error::Memory(m),
            EngineError::ErrorHandler(m) => Error::ErrorHandler(m),
            EngineError::Io(e) => Error::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_value_survives_roundtrip() {
        let engine = EngineError::runtime("boom");
        let host: Error = engine.into();
        match &host {
            Error::Runtime(m) => assert_eq!(m, "boom"),
            other => panic!("unexpected {other:?}"),
        }
        match host.into_engine() {
            EngineError::Runtime(v) => assert_eq!(v.to_string(), "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_argument_mismatch_names_both_types() {
        let e = Error::ArgumentTypeMismatch {
            index: 1,
            expected: TypeTag::Number,
            found: TypeTag::String,
        };
        let msg = e.to_string();
        assert!(msg.contains("number expected"));
        assert!(msg.contains("got string"));
    }
}
