//! Runtime error types for specialized code
//!
//! This module provides error types that can occur during execution
//! of generated routines and of the dynamic operator fallbacks.

use thiserror::Error;

/// Runtime error type
///
/// Represents language-level errors raised while executing script code.
/// Argument-cast failures and genuine callee failures share the
/// `TypeError` kind; the call-site linker tells them apart by where
/// they were raised, never by their shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Type mismatch error (bad operand, bad argument, indexing nil)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// No callable target for the callee value
    #[error("LinkError: {0}")]
    LinkFailure(String),

    /// Host function with no parameter pattern matching the arguments
    #[error("MethodError: no method matching {name}({arg_types})")]
    NoMatchingOverload {
        /// Host function name
        name: String,
        /// Rendered argument types
        arg_types: String,
    },

    /// Integer division or modulo by zero
    #[error("ArithmeticError: attempt to perform '{0}' by zero")]
    DivisionByZero(&'static str),

    /// Invalid table key (nil or NaN)
    #[error("KeyError: {0}")]
    InvalidKey(String),

    /// Internal invariant violation (e.g. a compilation failure)
    #[error("InternalError: {0}")]
    Internal(String),

    /// Generic error with custom message
    #[error("{0}")]
    Custom(String),
}

impl RuntimeError {
    /// Create a type error
    pub fn type_error<S: Into<String>>(msg: S) -> Self {
        RuntimeError::TypeError(msg.into())
    }

    /// Create a link failure for a non-callable value
    pub fn link_failure<S: Into<String>>(type_name: S) -> Self {
        RuntimeError::LinkFailure(format!(
            "attempt to call a {} value",
            type_name.into()
        ))
    }

    /// Create an overload resolution failure
    pub fn no_matching_overload<S1: Into<String>, S2: Into<String>>(
        name: S1,
        arg_types: S2,
    ) -> Self {
        RuntimeError::NoMatchingOverload {
            name: name.into(),
            arg_types: arg_types.into(),
        }
    }

    /// Create the error raised when indexing a non-table value
    pub fn index_error(type_name: &str) -> Self {
        RuntimeError::TypeError(format!("attempt to index a {} value", type_name))
    }

    /// Create an invalid key error
    pub fn invalid_key<S: Into<String>>(msg: S) -> Self {
        RuntimeError::InvalidKey(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        RuntimeError::Internal(msg.into())
    }

    /// Create a custom error
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        RuntimeError::Custom(msg.into())
    }

    /// True for the narrow error kind shared by argument casts and
    /// operand checks.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, RuntimeError::TypeError(_))
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::type_error("expected Float, got String");
        assert_eq!(format!("{}", err), "TypeError: expected Float, got String");

        let err = RuntimeError::link_failure("nil");
        assert_eq!(format!("{}", err), "LinkError: attempt to call a nil value");

        let err = RuntimeError::no_matching_overload("sqrt", "String");
        assert_eq!(format!("{}", err), "MethodError: no method matching sqrt(String)");

        let err = RuntimeError::DivisionByZero("n%0");
        assert_eq!(
            format!("{}", err),
            "ArithmeticError: attempt to perform 'n%0' by zero"
        );
    }

    #[test]
    fn test_index_error_is_type_mismatch() {
        assert!(RuntimeError::index_error("nil").is_type_mismatch());
        assert!(!RuntimeError::link_failure("nil").is_type_mismatch());
        assert!(!RuntimeError::internal("boom").is_type_mismatch());
    }
}
