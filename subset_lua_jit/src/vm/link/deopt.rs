//! Tagged exits of specialized entry points.
//!
//! A routine entered through a call site leaves in one of two ways besides
//! returning: its prologue rejected an argument (the site relinks), or its
//! body raised an error (the error propagates unchanged). Body errors are
//! wrapped in `CalleeFault` as they leave the routine, so a `TypeError`
//! raised by the callee's own code can never be mistaken for a rejected
//! argument, whatever its message.

use std::fmt;

use subset_lua_jit_runtime::RuntimeError;

/// Carrier for an error raised by callee code.
pub(crate) struct CalleeFault(RuntimeError);

impl CalleeFault {
    pub(crate) fn new(err: RuntimeError) -> Self {
        Self(err)
    }

    pub(crate) fn into_inner(self) -> RuntimeError {
        self.0
    }
}

impl fmt::Debug for CalleeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CalleeFault").field(&self.0).finish()
    }
}

#[derive(Debug)]
pub(crate) enum GuardedExit {
    /// Argument or upvalue cast failed; the bound target is stale.
    Deoptimize(RuntimeError),
    Fault(CalleeFault),
}

impl GuardedExit {
    /// The error as seen by script code.
    pub(crate) fn into_error(self) -> RuntimeError {
        match self {
            GuardedExit::Deoptimize(err) => err,
            GuardedExit::Fault(fault) => fault.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_error_unwraps_both_exits() {
        let err = RuntimeError::type_error("attempt to index a nil value");
        let fault = GuardedExit::Fault(CalleeFault::new(err.clone()));
        assert_eq!(fault.into_error(), err);
        assert_eq!(GuardedExit::Deoptimize(err.clone()).into_error(), err);
    }
}
