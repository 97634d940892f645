//! Compile-side error types.
//!
//! A `CompileError` means the specializer hit an invariant violation or a
//! node it cannot lower. It never describes a script-level failure; those
//! are `RuntimeError`s raised by the generated code.

use subset_lua_jit_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// `break` outside of any loop
    #[error("break outside of a loop in {function}")]
    BreakOutsideLoop { function: String },

    /// Slot index outside the prototype's declared locals
    #[error("local slot {slot} out of range in {function} ({count} locals)")]
    BadLocal {
        function: String,
        slot: usize,
        count: usize,
    },

    /// Upvalue index outside the prototype's templates
    #[error("upvalue {index} out of range in {function} ({count} upvalues)")]
    BadUpvalue {
        function: String,
        index: usize,
        count: usize,
    },

    /// Constant data delivered twice to the same routine
    #[error("constants already populated for {0}")]
    ConstantsPopulated(String),

    #[error("{0}")]
    Msg(String),
}

pub type CResult<T> = Result<T, CompileError>;

pub fn err<T>(m: impl Into<String>) -> CResult<T> {
    Err(CompileError::Msg(m.into()))
}

impl From<CompileError> for RuntimeError {
    fn from(err: CompileError) -> Self {
        RuntimeError::internal(format!("compilation failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_surfaces_as_internal() {
        let err: RuntimeError = CompileError::BreakOutsideLoop {
            function: "f".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "InternalError: compilation failed: break outside of a loop in f"
        );
    }
}
