//! Call-site guards.

use std::sync::Weak;

use serde::Serialize;
use subset_lua_jit_runtime::{Callable, FunctionRef, Value};

use crate::vm::Closure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardKind {
    Identity,
    Prototype,
}

/// Condition under which a bound target may run for a callee.
#[derive(Debug)]
pub(crate) enum Guard {
    /// This exact function value. The weak reference keeps the allocation
    /// (not the value) alive, so its address cannot be reused.
    Identity(Weak<dyn Callable>),
    /// Any closure of this prototype.
    Prototype(u64),
}

impl Guard {
    pub(crate) fn identity(func: &FunctionRef) -> Self {
        Guard::Identity(std::sync::Arc::downgrade(func))
    }

    pub(crate) fn kind(&self) -> GuardKind {
        match self {
            Guard::Identity(_) => GuardKind::Identity,
            Guard::Prototype(_) => GuardKind::Prototype,
        }
    }

    #[inline]
    pub(crate) fn holds(&self, callee: &Value) -> bool {
        let Value::Function(func) = callee else {
            return false;
        };
        match self {
            Guard::Identity(bound) => {
                std::ptr::addr_eq(bound.as_ptr(), std::sync::Arc::as_ptr(func))
            }
            Guard::Prototype(id) => func
                .as_any()
                .downcast_ref::<Closure>()
                .map_or(false, |closure| closure.prototype().id() == *id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::core::FunctionPrototype;
    use crate::vm::Engine;

    #[test]
    fn test_identity_vs_prototype() {
        let engine = Engine::with_default_config();
        let proto = FunctionPrototype::builder("f").build();
        let a = engine.instantiate(&proto);
        let b = engine.instantiate(&proto);
        let Value::Function(func) = &a else {
            panic!("expected a function");
        };

        let identity = Guard::identity(func);
        assert!(identity.holds(&a));
        assert!(!identity.holds(&b));
        assert!(!identity.holds(&Value::Nil));

        let prototype = Guard::Prototype(proto.id());
        assert!(prototype.holds(&a));
        assert!(prototype.holds(&b));
        assert_eq!(prototype.kind(), GuardKind::Prototype);
    }
}
